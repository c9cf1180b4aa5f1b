//! Scripted in-memory adapter used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::error::{BluetoothError, Result};
use crate::core::bluetooth::types::{
    Advertisement, CharacteristicProperties, GattCharacteristic, GattService,
};

#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    /// Never answers
    Hang,
    /// Succeeds after the delay
    Delay(Duration),
}

#[derive(Default)]
pub struct FakeAdapter {
    enabled: AtomicBool,
    cycles: Mutex<VecDeque<Vec<Advertisement>>>,
    known: Mutex<Vec<Advertisement>>,
    sink: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    fail_scan_start: AtomicBool,
    fail_scan_stop: AtomicBool,
    scan_starts: AtomicUsize,
    calls: Mutex<Vec<String>>,
    connect_behavior: Mutex<HashMap<String, ConnectBehavior>>,
    fail_disconnect: AtomicBool,
    connected: Mutex<HashSet<String>>,
    max_connected: AtomicUsize,
    fail_services: AtomicBool,
    services: Mutex<Vec<GattService>>,
    characteristics: Mutex<Vec<GattCharacteristic>>,
    reads: Mutex<HashMap<Uuid, std::result::Result<Vec<u8>, String>>>,
    read_counts: Mutex<HashMap<Uuid, usize>>,
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        let adapter = Self::default();
        adapter.enabled.store(true, Ordering::SeqCst);
        adapter
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Sightings delivered by the next successful `start_scan`
    pub fn push_cycle(&self, advertisements: Vec<Advertisement>) {
        self.cycles.lock().unwrap().push_back(advertisements);
    }

    pub fn set_known(&self, known: Vec<Advertisement>) {
        *self.known.lock().unwrap() = known;
    }

    pub fn fail_scan_start(&self, fail: bool) {
        self.fail_scan_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_scan_stop(&self, fail: bool) {
        self.fail_scan_stop.store(fail, Ordering::SeqCst);
    }

    pub fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_connect_behavior(&self, device_id: &str, behavior: ConnectBehavior) {
        self.connect_behavior
            .lock()
            .unwrap()
            .insert(device_id.to_string(), behavior);
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn connected_devices(&self) -> HashSet<String> {
        self.connected.lock().unwrap().clone()
    }

    /// Highest number of simultaneously connected devices ever observed
    pub fn max_connected(&self) -> usize {
        self.max_connected.load(Ordering::SeqCst)
    }

    /// Simulates the peripheral going away without a disconnect request
    pub fn drop_link(&self, device_id: &str) {
        self.connected.lock().unwrap().remove(device_id);
    }

    pub fn fail_services(&self, fail: bool) {
        self.fail_services.store(fail, Ordering::SeqCst);
    }

    pub fn add_characteristic(&self, service_uuid: Uuid, uuid: Uuid, read: bool, notify: bool) {
        let mut services = self.services.lock().unwrap();
        if !services.iter().any(|s| s.uuid == service_uuid) {
            services.push(GattService { uuid: service_uuid });
        }
        self.characteristics.lock().unwrap().push(GattCharacteristic {
            service_uuid,
            uuid,
            properties: CharacteristicProperties { read, notify },
        });
    }

    pub fn set_read(&self, uuid: Uuid, value: std::result::Result<Vec<u8>, String>) {
        self.reads.lock().unwrap().insert(uuid, value);
    }

    pub fn read_count(&self, uuid: Uuid) -> usize {
        self.read_counts.lock().unwrap().get(&uuid).copied().unwrap_or(0)
    }

    /// Pushes a value-changed notification to the subscriber of `uuid`
    pub fn notify(&self, uuid: Uuid, payload: Vec<u8>) -> bool {
        self.subscribers
            .lock()
            .unwrap()
            .get(&uuid)
            .is_some_and(|tx| tx.send(payload).is_ok())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BluetoothAdapter for FakeAdapter {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn known_devices(&self) -> Result<Vec<Advertisement>> {
        Ok(self.known.lock().unwrap().clone())
    }

    async fn start_scan(&self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<()> {
        self.record("start_scan".to_string());
        if self.fail_scan_start.load(Ordering::SeqCst) {
            return Err(BluetoothError::Scan("start rejected".to_string()));
        }
        let sightings = self.cycles.lock().unwrap().pop_front().unwrap_or_default();
        for advertisement in sightings {
            let _ = sink.send(advertisement);
        }
        *self.sink.lock().unwrap() = Some(sink);
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record("stop_scan".to_string());
        self.sink.lock().unwrap().take();
        if self.fail_scan_stop.load(Ordering::SeqCst) {
            return Err(BluetoothError::Scan("stop rejected".to_string()));
        }
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        self.record(format!("connect {}", device_id));
        let behavior = self
            .connect_behavior
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or(ConnectBehavior::Succeed);
        match behavior {
            ConnectBehavior::Succeed => {}
            ConnectBehavior::Fail(reason) => return Err(BluetoothError::ConnectFailed(reason)),
            ConnectBehavior::Hang => std::future::pending::<()>().await,
            ConnectBehavior::Delay(delay) => tokio::time::sleep(delay).await,
        }
        let mut connected = self.connected.lock().unwrap();
        connected.insert(device_id.to_string());
        self.max_connected.fetch_max(connected.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        self.record(format!("disconnect {}", device_id));
        self.connected.lock().unwrap().remove(device_id);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(BluetoothError::Disconnect("stack refused".to_string()));
        }
        Ok(())
    }

    async fn is_connected(&self, device_id: &str) -> bool {
        self.connected.lock().unwrap().contains(device_id)
    }

    async fn services(&self, _device_id: &str) -> Result<Vec<GattService>> {
        if self.fail_services.load(Ordering::SeqCst) {
            return Err(BluetoothError::Gatt("service discovery failed".to_string()));
        }
        Ok(self.services.lock().unwrap().clone())
    }

    async fn characteristics(
        &self,
        _device_id: &str,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>> {
        Ok(self
            .characteristics
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.service_uuid == service.uuid)
            .cloned()
            .collect())
    }

    async fn read(&self, _device_id: &str, characteristic: &GattCharacteristic) -> Result<Vec<u8>> {
        *self
            .read_counts
            .lock()
            .unwrap()
            .entry(characteristic.uuid)
            .or_default() += 1;
        match self.reads.lock().unwrap().get(&characteristic.uuid).cloned() {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(reason)) => Err(BluetoothError::Gatt(reason)),
            None => Ok(Vec::new()),
        }
    }

    async fn subscribe(
        &self,
        _device_id: &str,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(characteristic.uuid, tx);
        Ok(rx)
    }
}
