use crate::transport::{
    BleTransport, Capability, DeviceDescriptor, GattCharacteristic, GattService, LinkLostSender, Notification, NotificationSink,
    TransportError, WriteMode,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

pub const ADDR: &str = "9C:F1:D4:40:08:13";

/// Heart rate measurement, notify only
pub fn hrm() -> Uuid {
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb)
}

/// Read + write
pub fn control() -> Uuid {
    Uuid::from_u128(0x00002a39_0000_1000_8000_00805f9b34fb)
}

/// Write without response only
pub fn fast_write() -> Uuid {
    Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e)
}

pub fn heart_rate_tree() -> Vec<GattService> {
    vec![GattService {
        uuid: Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb),
        characteristics: vec![
            GattCharacteristic::new(hrm(), [Capability::Notify]),
            GattCharacteristic::new(control(), [Capability::Read, Capability::Write]),
            GattCharacteristic::new(fast_write(), [Capability::WriteWithoutResponse]),
        ],
    }]
}

/// In-memory peripheral set, shared between a test and the session under test
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    advertising: Vec<DeviceDescriptor>,
    trees: HashMap<String, Vec<GattService>>,
    values: HashMap<Uuid, Vec<u8>>,
    writes: Vec<(Uuid, Vec<u8>, WriteMode)>,
    calls: Vec<String>,
    scan_timeouts: Vec<Duration>,
    subscriptions: BTreeMap<u64, (Uuid, NotificationSink)>,
    next_token: u64,
    lost: Option<(String, LinkLostSender)>,
    adapter_down: bool,
    refuse_connect: bool,
    hang_io: bool,
}

pub struct MockLink {
    pub address: String,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Make a device visible to scans and connectable with the given tree
    pub fn add_device(&self, address: &str, name: Option<&str>, tree: Vec<GattService>) {
        let mut state = self.state();
        state.advertising.push(DeviceDescriptor {
            address: address.to_owned(),
            name: name.map(str::to_owned),
            services: tree.iter().map(|svc| svc.uuid).collect(),
            rssi: Some(-60),
        });
        state.trees.insert(address.to_owned(), tree);
    }

    /// Queue an extra advertisement, e.g. a repeat of a known address
    pub fn advertise(&self, descriptor: DeviceDescriptor) {
        self.state().advertising.push(descriptor);
    }

    pub fn set_value(&self, uuid: Uuid, value: &[u8]) {
        self.state().values.insert(uuid, value.to_vec());
    }

    pub fn set_adapter_down(&self, down: bool) {
        self.state().adapter_down = down;
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    /// Reads and writes never complete
    pub fn set_hang_io(&self, hang: bool) {
        self.state().hang_io = hang;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteMode)> {
        self.state().writes.clone()
    }

    pub fn scan_timeouts(&self) -> Vec<Duration> {
        self.state().scan_timeouts.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Push a value to every subscriber of `uuid`
    pub fn notify(&self, uuid: Uuid, value: &[u8]) {
        let state = self.state();
        for (subscribed, sink) in state.subscriptions.values() {
            if *subscribed == uuid {
                let _ = sink.send(Notification { uuid, value: value.to_vec() });
            }
        }
    }

    /// Simulate the peripheral going out of range
    pub fn drop_link(&self) {
        let mut state = self.state();
        if let Some((address, lost)) = state.lost.take() {
            let _ = lost.send(address);
        }
        state.subscriptions.clear();
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    type Link = MockLink;
    type Subscription = u64;

    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut state = self.state();
        state.calls.push("scan".into());
        state.scan_timeouts.push(timeout);
        if state.adapter_down {
            return Err(TransportError::new("adapter unavailable"));
        }
        Ok(state.advertising.clone())
    }

    async fn connect(&self, address: &str, lost: LinkLostSender) -> Result<MockLink, TransportError> {
        let mut state = self.state();
        state.calls.push(format!("connect {address}"));
        if state.refuse_connect || !state.trees.contains_key(address) {
            return Err(TransportError::new(format!("connection to {address} failed")));
        }
        state.lost = Some((address.to_owned(), lost));
        Ok(MockLink { address: address.to_owned() })
    }

    async fn disconnect(&self, link: &MockLink) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(format!("disconnect {}", link.address));
        state.lost = None;
        Ok(())
    }

    async fn discover_services(&self, link: &MockLink) -> Result<Vec<GattService>, TransportError> {
        let mut state = self.state();
        state.calls.push("discover".into());
        Ok(state.trees.get(&link.address).cloned().unwrap_or_default())
    }

    async fn read_characteristic(&self, _link: &MockLink, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let hang = {
            let mut state = self.state();
            state.calls.push(format!("read {uuid}"));
            state.hang_io
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self.state().values.get(&uuid).cloned().unwrap_or_default())
    }

    async fn write_characteristic(
        &self,
        _link: &MockLink,
        uuid: Uuid,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let hang = {
            let mut state = self.state();
            state.calls.push(format!("write {uuid}"));
            state.hang_io
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.state().writes.push((uuid, bytes.to_vec(), mode));
        Ok(())
    }

    async fn subscribe(
        &self,
        _link: &MockLink,
        uuid: Uuid,
        sink: NotificationSink,
    ) -> Result<u64, TransportError> {
        let hang = {
            let mut state = self.state();
            state.calls.push(format!("subscribe {uuid}"));
            state.hang_io
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        state.next_token += 1;
        let token = state.next_token;
        state.subscriptions.insert(token, (uuid, sink));
        Ok(token)
    }

    async fn unsubscribe(&self, _link: &MockLink, subscription: u64) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push("unsubscribe".into());
        state.subscriptions.remove(&subscription);
        Ok(())
    }
}
