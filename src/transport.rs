use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use strum::Display;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Well-known service & characteristic UUIDs, used to label the service tree
///
/// NUS UUIDs are from the Nordic UART Service, the rest are Bluetooth SIG
/// assigned numbers expanded onto the base UUID.
pub mod known_uuids {
    use uuid::Uuid;

    /// Expands a 16-bit SIG assigned number onto the Bluetooth base UUID
    pub const fn sig_uuid(short: u16) -> Uuid {
        Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5F9B_34FB | ((short as u128) << 96))
    }

    /// NUS Service UUID
    pub const NUS_SVC_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
    /// NUS RX UUID
    pub const NUS_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
    /// NUS TX UUID
    pub const NUS_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

    const NAMES: &[(Uuid, &str)] = &[
        (NUS_SVC_UUID, "Nordic UART Service"),
        (NUS_RX_CHAR_UUID, "NUS RX"),
        (NUS_TX_CHAR_UUID, "NUS TX"),
        (sig_uuid(0x1800), "Generic Access"),
        (sig_uuid(0x1801), "Generic Attribute"),
        (sig_uuid(0x180A), "Device Information"),
        (sig_uuid(0x180D), "Heart Rate"),
        (sig_uuid(0x180F), "Battery Service"),
        (sig_uuid(0x2A00), "Device Name"),
        (sig_uuid(0x2A01), "Appearance"),
        (sig_uuid(0x2A05), "Service Changed"),
        (sig_uuid(0x2A19), "Battery Level"),
        (sig_uuid(0x2A24), "Model Number String"),
        (sig_uuid(0x2A25), "Serial Number String"),
        (sig_uuid(0x2A26), "Firmware Revision String"),
        (sig_uuid(0x2A29), "Manufacturer Name String"),
        (sig_uuid(0x2A37), "Heart Rate Measurement"),
    ];

    pub fn name_of(uuid: &Uuid) -> Option<&'static str> {
        NAMES.iter().find(|(known, _)| known == uuid).map(|(_, name)| *name)
    }
}

/// Failure inside the BLE stack: adapter, permissions, link or I/O
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        TransportError(msg.into())
    }
}

/// One advertising device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: String,
    pub name: Option<String>,
    pub services: BTreeSet<Uuid>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Capability {
    Read,
    Write,
    WriteWithoutResponse,
    Notify,
    Indicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub capabilities: BTreeSet<Capability>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        GattCharacteristic {
            uuid,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// A value pushed by the peripheral on a subscribed characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

pub type NotificationSink = mpsc::UnboundedSender<Notification>;

/// Receives the peripheral address once when its link drops unexpectedly
pub type LinkLostSender = mpsc::UnboundedSender<String>;

/// BLE central interface
///
/// Implementations own the radio side. Callers hold the returned `Link`
/// for the lifetime of one connection and pass it back on every call.
#[async_trait]
pub trait BleTransport: Send + Sync {
    type Link: Send + Sync;
    type Subscription: Send;

    /// Discover advertising devices for `timeout`
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError>;
    /// Open a link; `lost` fires if the link later drops on its own
    async fn connect(&self, address: &str, lost: LinkLostSender) -> Result<Self::Link, TransportError>;
    async fn disconnect(&self, link: &Self::Link) -> Result<(), TransportError>;
    async fn discover_services(&self, link: &Self::Link) -> Result<Vec<GattService>, TransportError>;
    async fn read_characteristic(&self, link: &Self::Link, uuid: Uuid) -> Result<Vec<u8>, TransportError>;
    async fn write_characteristic(
        &self,
        link: &Self::Link,
        uuid: Uuid,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;
    /// Start forwarding notifications for `uuid` into `sink`
    async fn subscribe(
        &self,
        link: &Self::Link,
        uuid: Uuid,
        sink: NotificationSink,
    ) -> Result<Self::Subscription, TransportError>;
    async fn unsubscribe(&self, link: &Self::Link, subscription: Self::Subscription) -> Result<(), TransportError>;
}
