use crate::transport::{
    BleTransport, Capability, DeviceDescriptor, GattCharacteristic, GattService, LinkLostSender,
    Notification, NotificationSink, TransportError, WriteMode,
};

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long `connect` looks for an address that no scan has reported yet
const LOOKUP_WINDOW: Duration = Duration::from_secs(5);

fn btle_err(op: &'static str) -> impl FnOnce(btleplug::Error) -> TransportError {
    move |err| match err {
        btleplug::Error::PermissionDenied => {
            TransportError::new(format!("{op}: permission denied by the Bluetooth stack"))
        }
        err => TransportError::new(format!("{op}: {err}")),
    }
}

fn capabilities(flags: CharPropFlags) -> Vec<Capability> {
    [
        (CharPropFlags::READ, Capability::Read),
        (CharPropFlags::WRITE, Capability::Write),
        (CharPropFlags::WRITE_WITHOUT_RESPONSE, Capability::WriteWithoutResponse),
        (CharPropFlags::NOTIFY, Capability::Notify),
        (CharPropFlags::INDICATE, Capability::Indicate),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, capability)| capability)
    .collect()
}

fn find_characteristic_by_uuid(
    peripheral: &Peripheral,
    uuid: Uuid,
) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|chr| chr.uuid == uuid)
        .ok_or_else(|| TransportError::new(format!("characteristic {uuid} not discovered on peripheral")))
}

/// Connected peripheral plus the task watching for its disconnection
pub struct BtleLink {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

pub struct BtleSubscription {
    characteristic: Characteristic,
    forwarder: JoinHandle<()>,
}

impl Drop for BtleSubscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    /// Grab adapter number `index` from the platform manager
    pub async fn acquire(index: usize) -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(btle_err("bluetooth manager"))?;
        let adapters = manager.adapters().await.map_err(btle_err("list adapters"))?;
        info!("found {} BLE adapter(s)", adapters.len());
        let adapter = adapters
            .into_iter()
            .nth(index)
            .ok_or_else(|| TransportError::new(format!("no Bluetooth adapter at index {index}")))?;
        if let Ok(adapter_info) = adapter.adapter_info().await {
            info!("adapter = {adapter_info}");
        }
        Ok(BtleTransport { adapter })
    }

    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        let peripherals = self.adapter.peripherals().await.map_err(btle_err("peripherals"))?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    /// Scan until `address` shows up or the lookup window closes
    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        debug!("searching for {address}...");
        let mut events = self.adapter.events().await.map_err(btle_err("events"))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(btle_err("start scan"))?;

        let search = async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                    let peripheral = self.adapter.peripheral(&id).await.map_err(btle_err("peripheral"))?;
                    if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                        debug!("found [{address}] at [{id}]");
                        return Ok(peripheral);
                    }
                }
            }
            Err::<Peripheral, _>(TransportError::new("unexpected end of adapter event stream"))
        };
        let found = tokio::time::timeout(LOOKUP_WINDOW, search).await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("stop scan failed: {err}");
        }
        found.map_err(|_| TransportError::new(format!("{address} was not found within {LOOKUP_WINDOW:?}")))?
    }

    async fn watch_link(
        &self,
        peripheral: &Peripheral,
        address: &str,
        lost: LinkLostSender,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut events = self.adapter.events().await.map_err(btle_err("events"))?;
        let id = peripheral.id();
        let address = address.to_owned();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        debug!("adapter reports {address} disconnected");
                        let _ = lost.send(address);
                        break;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    type Link = BtleLink;
    type Subscription = BtleSubscription;

    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(btle_err("start scan"))?;
        tokio::time::sleep(timeout).await;
        let peripherals = self.adapter.peripherals().await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("stop scan failed: {err}");
        }

        let mut devices = Vec::new();
        for peripheral in peripherals.map_err(btle_err("peripherals"))? {
            let props = match peripheral.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(err) => {
                    debug!("skipping {}: {err}", peripheral.address());
                    continue;
                }
            };
            devices.push(DeviceDescriptor {
                address: props.address.to_string(),
                name: props.local_name,
                services: props.services.into_iter().collect(),
                rssi: props.rssi,
            });
        }
        Ok(devices)
    }

    async fn connect(&self, address: &str, lost: LinkLostSender) -> Result<BtleLink, TransportError> {
        let peripheral = match self.known_peripheral(address).await? {
            Some(peripheral) => peripheral,
            None => self.find_peripheral(address).await?,
        };
        let watcher = self.watch_link(&peripheral, address, lost).await?;
        // from here on the watcher is aborted when the link is dropped
        let link = BtleLink { peripheral, watcher };
        link.peripheral.connect().await.map_err(btle_err("connect"))?;
        Ok(link)
    }

    async fn disconnect(&self, link: &BtleLink) -> Result<(), TransportError> {
        link.watcher.abort();
        link.peripheral.disconnect().await.map_err(btle_err("disconnect"))
    }

    async fn discover_services(&self, link: &BtleLink) -> Result<Vec<GattService>, TransportError> {
        link.peripheral
            .discover_services()
            .await
            .map_err(btle_err("discover services"))?;
        Ok(link
            .peripheral
            .services()
            .into_iter()
            .map(|svc| GattService {
                uuid: svc.uuid,
                characteristics: svc
                    .characteristics
                    .into_iter()
                    .map(|chr| GattCharacteristic::new(chr.uuid, capabilities(chr.properties)))
                    .collect(),
            })
            .collect())
    }

    async fn read_characteristic(&self, link: &BtleLink, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let chr = find_characteristic_by_uuid(&link.peripheral, uuid)?;
        link.peripheral.read(&chr).await.map_err(btle_err("read"))
    }

    async fn write_characteristic(
        &self,
        link: &BtleLink,
        uuid: Uuid,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let chr = find_characteristic_by_uuid(&link.peripheral, uuid)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        link.peripheral
            .write(&chr, bytes, write_type)
            .await
            .map_err(btle_err("write"))
    }

    async fn subscribe(
        &self,
        link: &BtleLink,
        uuid: Uuid,
        sink: NotificationSink,
    ) -> Result<BtleSubscription, TransportError> {
        let characteristic = find_characteristic_by_uuid(&link.peripheral, uuid)?;
        // grab the stream before subscribing so the first value is not missed
        let mut notifications = link
            .peripheral
            .notifications()
            .await
            .map_err(btle_err("notifications"))?;
        link.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(btle_err("subscribe"))?;

        let forwarder = tokio::spawn(async move {
            while let Some(ntf) = notifications.next().await {
                if ntf.uuid != uuid {
                    continue;
                }
                if sink.send(Notification { uuid, value: ntf.value }).is_err() {
                    break;
                }
            }
            debug!("notification stream for {uuid} ended");
        });
        Ok(BtleSubscription { characteristic, forwarder })
    }

    async fn unsubscribe(&self, link: &BtleLink, subscription: BtleSubscription) -> Result<(), TransportError> {
        subscription.forwarder.abort();
        link.peripheral
            .unsubscribe(&subscription.characteristic)
            .await
            .map_err(btle_err("unsubscribe"))
    }
}
