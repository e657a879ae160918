use crate::error::{Result, ShellError};
use crate::transport::{
    BleTransport, Capability, DeviceDescriptor, GattCharacteristic, GattService, NotificationSink,
    TransportError, WriteMode,
};

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TryRecvError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyToggle {
    Started,
    Stopped,
}

/// `XX:XX:XX:XX:XX:XX` with hex digits in either case
pub fn is_link_address(s: &str) -> bool {
    let octets: Vec<&str> = s.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

enum Raced<R> {
    Done(std::result::Result<R, TransportError>),
    Lost(String),
}

/// Runs `op` unless the link-loss channel fires first
async fn race_link_loss<R>(
    lost: &mut Option<mpsc::UnboundedReceiver<String>>,
    op: impl Future<Output = std::result::Result<R, TransportError>>,
) -> Raced<R> {
    let Some(lost) = lost.as_mut() else {
        return Raced::Done(op.await);
    };
    tokio::select! {
        result = op => Raced::Done(result),
        Some(address) = lost.recv() => Raced::Lost(address),
    }
}

/// The one logical connection the shell holds
///
/// All radio work is delegated to `T`; this type only keeps the state
/// machine, the discovered tree and the active subscriptions consistent.
pub struct PeripheralSession<T: BleTransport> {
    transport: T,
    state: ConnectionState,
    target: Option<String>,
    link: Option<T::Link>,
    link_lost: Option<mpsc::UnboundedReceiver<String>>,
    services: Vec<GattService>,
    subscriptions: BTreeMap<Uuid, T::Subscription>,
    scanned: Vec<DeviceDescriptor>,
    notifications: NotificationSink,
    epoch: u64,
}

impl<T: BleTransport> PeripheralSession<T> {
    pub fn new(transport: T, notifications: NotificationSink) -> Self {
        PeripheralSession {
            transport,
            state: ConnectionState::Disconnected,
            target: None,
            link: None,
            link_lost: None,
            services: Vec::new(),
            subscriptions: BTreeMap::new(),
            scanned: Vec::new(),
            notifications,
            epoch: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Identifies the current connection; `None` while not connected.
    /// Every successful `connect` yields a new value.
    pub fn connection_epoch(&self) -> Option<u64> {
        self.is_connected().then_some(self.epoch)
    }

    #[cfg(test)]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ShellError::NotConnected)
        }
    }

    /// Scan and remember the result for name lookups by `connect`.
    ///
    /// Repeated advertisements for one address collapse into a single entry
    /// holding the last-seen name and service set.
    pub async fn scan(&mut self, timeout: Duration) -> Result<&[DeviceDescriptor]> {
        let seen = self.transport.scan(timeout).await?;
        let mut merged: Vec<DeviceDescriptor> = Vec::with_capacity(seen.len());
        for device in seen {
            match merged.iter_mut().find(|d| d.address.eq_ignore_ascii_case(&device.address)) {
                Some(existing) => *existing = device,
                None => merged.push(device),
            }
        }
        debug!("scan found {} device(s)", merged.len());
        self.scanned = merged;
        Ok(&self.scanned)
    }

    fn resolve_target(&self, identifier: &str) -> Result<String> {
        if let Some(device) = self
            .scanned
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(identifier))
        {
            return Ok(device.address.clone());
        }
        if is_link_address(identifier) {
            return Ok(identifier.to_ascii_uppercase());
        }

        let needle = identifier.to_lowercase();
        let matches: Vec<&DeviceDescriptor> = self
            .scanned
            .iter()
            .filter(|d| {
                d.name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .collect();
        match matches.as_slice() {
            [] => Err(ShellError::NotFound(identifier.to_owned())),
            [device] => Ok(device.address.clone()),
            many => Err(ShellError::AmbiguousTarget {
                identifier: identifier.to_owned(),
                candidates: many
                    .iter()
                    .map(|d| format!("{} ({})", d.name.as_deref().unwrap_or_default(), d.address))
                    .collect(),
            }),
        }
    }

    /// Connect by address, or by a name fragment from the last scan.
    ///
    /// An existing connection is closed first. Returns the address connected to.
    pub async fn connect(&mut self, identifier: &str) -> Result<String> {
        let address = self.resolve_target(identifier)?;
        if self.state != ConnectionState::Disconnected {
            self.disconnect().await?;
        }

        self.state = ConnectionState::Connecting;
        self.target = Some(address.clone());
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let link = match self.transport.connect(&address, lost_tx).await {
            Ok(link) => link,
            Err(err) => {
                self.reset();
                return Err(err.into());
            }
        };
        let services = match self.transport.discover_services(&link).await {
            Ok(services) => services,
            Err(err) => {
                if let Err(close_err) = self.transport.disconnect(&link).await {
                    warn!("closing {address} after failed discovery: {close_err}");
                }
                self.reset();
                return Err(err.into());
            }
        };

        info!("connected to {address}, {} service(s)", services.len());
        self.link = Some(link);
        self.link_lost = Some(lost_rx);
        self.services = services;
        self.epoch += 1;
        self.state = ConnectionState::Connected;
        Ok(address)
    }

    /// Close the session. Returns whether there was anything to close.
    pub async fn disconnect(&mut self) -> Result<bool> {
        let Some(link) = self.link.take() else {
            self.reset();
            return Ok(false);
        };
        for (uuid, subscription) in std::mem::take(&mut self.subscriptions) {
            if let Err(err) = self.transport.unsubscribe(&link, subscription).await {
                warn!("unsubscribe {uuid}: {err}");
            }
        }
        if let Err(err) = self.transport.disconnect(&link).await {
            warn!("disconnect: {err}");
        }
        info!("disconnected from {}", self.target.as_deref().unwrap_or("peripheral"));
        self.reset();
        Ok(true)
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.target = None;
        self.link = None;
        self.link_lost = None;
        self.services.clear();
        self.subscriptions.clear();
    }

    fn mark_lost(&mut self, address: &str) {
        warn!("link to {address} lost");
        self.reset();
    }

    /// Apply a pending link-loss event, if any. Returns the lost address.
    pub fn poll_link(&mut self) -> Option<String> {
        let lost = self.link_lost.as_mut()?;
        match lost.try_recv() {
            Ok(address) => {
                self.mark_lost(&address);
                Some(address)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn services(&self) -> Result<&[GattService]> {
        self.ensure_connected()?;
        Ok(&self.services)
    }

    pub fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.lookup(uuid).is_some()
    }

    fn lookup(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.services
            .iter()
            .flat_map(|svc| svc.characteristics.iter())
            .find(|chr| chr.uuid == uuid)
    }

    fn characteristic(&mut self, uuid: Uuid) -> Result<&GattCharacteristic> {
        self.poll_link();
        self.ensure_connected()?;
        self.lookup(uuid).ok_or(ShellError::UnknownCharacteristic(uuid))
    }

    fn settle<R>(&mut self, op: &str, raced: Raced<R>) -> Result<R> {
        match raced {
            Raced::Done(result) => Ok(result?),
            Raced::Lost(address) => {
                self.mark_lost(&address);
                Err(TransportError::new(format!("{op} interrupted: link to {address} lost")).into())
            }
        }
    }

    pub async fn read(&mut self, uuid: Uuid) -> Result<Vec<u8>> {
        if !self.characteristic(uuid)?.supports(Capability::Read) {
            return Err(ShellError::Capability { uuid, capability: Capability::Read });
        }
        let raced = {
            let link = self.link.as_ref().ok_or(ShellError::NotConnected)?;
            race_link_loss(&mut self.link_lost, self.transport.read_characteristic(link, uuid)).await
        };
        self.settle("read", raced)
    }

    pub async fn write(&mut self, uuid: Uuid, bytes: &[u8]) -> Result<()> {
        let chr = self.characteristic(uuid)?;
        let mode = if chr.supports(Capability::Write) {
            WriteMode::WithResponse
        } else if chr.supports(Capability::WriteWithoutResponse) {
            WriteMode::WithoutResponse
        } else {
            return Err(ShellError::Capability { uuid, capability: Capability::Write });
        };
        let raced = {
            let link = self.link.as_ref().ok_or(ShellError::NotConnected)?;
            race_link_loss(
                &mut self.link_lost,
                self.transport.write_characteristic(link, uuid, bytes, mode),
            )
            .await
        };
        self.settle("write", raced)
    }

    /// Start notifications on `uuid`, or stop them if already running
    pub async fn toggle_notify(&mut self, uuid: Uuid) -> Result<NotifyToggle> {
        let chr = self.characteristic(uuid)?;
        let can_notify = chr.supports(Capability::Notify) || chr.supports(Capability::Indicate);

        if let Some(subscription) = self.subscriptions.remove(&uuid) {
            let raced = {
                let link = self.link.as_ref().ok_or(ShellError::NotConnected)?;
                race_link_loss(&mut self.link_lost, self.transport.unsubscribe(link, subscription)).await
            };
            self.settle("notify", raced)?;
            return Ok(NotifyToggle::Stopped);
        }
        if !can_notify {
            return Err(ShellError::Capability { uuid, capability: Capability::Notify });
        }
        let raced = {
            let link = self.link.as_ref().ok_or(ShellError::NotConnected)?;
            race_link_loss(
                &mut self.link_lost,
                self.transport.subscribe(link, uuid, self.notifications.clone()),
            )
            .await
        };
        let subscription = self.settle("notify", raced)?;
        self.subscriptions.insert(uuid, subscription);
        Ok(NotifyToggle::Started)
    }
}
