use crate::error::{Result, ShellError};
use crate::session::PeripheralSession;
use crate::transport::BleTransport;

use uuid::Uuid;

/// Characteristic used by `read`, `write` and `notify` when no UUID is typed.
///
/// The selection is tied to the connection it was made on. Once that
/// connection ends, by `disconnect` or by link loss, the selection reads
/// as unset even before it is cleared.
#[derive(Debug, Default)]
pub struct DefaultCharacteristic {
    selected: Option<(Uuid, u64)>,
}

impl DefaultCharacteristic {
    pub fn set<T: BleTransport>(&mut self, session: &PeripheralSession<T>, uuid: Uuid) -> Result<()> {
        let epoch = session.connection_epoch().ok_or(ShellError::NotConnected)?;
        if !session.has_characteristic(uuid) {
            return Err(ShellError::UnknownCharacteristic(uuid));
        }
        self.selected = Some((uuid, epoch));
        Ok(())
    }

    pub fn clear(&mut self) -> Option<Uuid> {
        self.selected.take().map(|(uuid, _)| uuid)
    }

    pub fn get<T: BleTransport>(&self, session: &PeripheralSession<T>) -> Option<Uuid> {
        match self.selected {
            Some((uuid, epoch)) if session.connection_epoch() == Some(epoch) => Some(uuid),
            _ => None,
        }
    }

    /// `explicit` if given, else the live selection
    pub fn resolve<T: BleTransport>(
        &self,
        session: &PeripheralSession<T>,
        explicit: Option<Uuid>,
    ) -> Result<Uuid> {
        explicit
            .or_else(|| self.get(session))
            .ok_or(ShellError::NoDefaultCharacteristic)
    }
}
