//! End-to-end tests of the manager against a scripted stack.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ble_device_manager_lib::config::bluetooth_config::BluetoothConfig;
use ble_device_manager_lib::core::bluetooth::{
    Advertisement, BluetoothAdapter, BluetoothError, CharacteristicProperties, GattCharacteristic,
    GattService, Result, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE,
};
use ble_device_manager_lib::{BluetoothManager, ConnectOutcome, ConnectionPhase, ManagerEvent};
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc;

/// A stack with one battery-powered peripheral in range
#[derive(Default)]
struct ScriptedStack {
    enabled: AtomicBool,
    in_range: Mutex<Vec<Advertisement>>,
    scans: AtomicUsize,
    connected: Mutex<HashSet<String>>,
    unreachable: AtomicBool,
}

#[async_trait]
impl BluetoothAdapter for ScriptedStack {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn known_devices(&self) -> Result<Vec<Advertisement>> {
        Ok(Vec::new())
    }

    async fn start_scan(&self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<()> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        for advertisement in self.in_range.lock().unwrap().iter() {
            let _ = sink.send(advertisement.clone());
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BluetoothError::ConnectFailed("GATT error 133".to_string()));
        }
        self.connected.lock().unwrap().insert(device_id.to_string());
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        self.connected.lock().unwrap().remove(device_id);
        Ok(())
    }

    async fn is_connected(&self, device_id: &str) -> bool {
        self.connected.lock().unwrap().contains(device_id)
    }

    async fn services(&self, _device_id: &str) -> Result<Vec<GattService>> {
        Ok(vec![GattService { uuid: UUID_BATTERY_SERVICE }])
    }

    async fn characteristics(&self, _device_id: &str, service: &GattService) -> Result<Vec<GattCharacteristic>> {
        Ok(vec![GattCharacteristic {
            service_uuid: service.uuid,
            uuid: UUID_BATTERY_LEVEL,
            properties: CharacteristicProperties { read: true, notify: false },
        }])
    }

    async fn read(&self, _device_id: &str, _characteristic: &GattCharacteristic) -> Result<Vec<u8>> {
        Ok(vec![0x55])
    }

    async fn subscribe(
        &self,
        _device_id: &str,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        Err(BluetoothError::Gatt(format!("{} does not notify", characteristic.uuid)))
    }
}

fn stack(enabled: bool) -> Arc<ScriptedStack> {
    let stack = ScriptedStack::default();
    stack.enabled.store(enabled, Ordering::SeqCst);
    stack
        .in_range
        .lock()
        .unwrap()
        .push(Advertisement::new("thermo-1", Some("Thermo"), -48));
    Arc::new(stack)
}

fn config() -> BluetoothConfig {
    BluetoothConfig {
        scan_duration_ms: 2_000,
        idle_pause_ms: 500,
        ..BluetoothConfig::default()
    }
}

fn drain(rx: &mut Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test(start_paused = true)]
async fn scanning_waits_for_the_radio() {
    let stack = stack(false);
    let manager = BluetoothManager::new(stack.clone(), config());
    let mut events = manager.subscribe();
    manager.start().await;

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(stack.scans.load(Ordering::SeqCst), 0);
    assert!(!manager.is_bluetooth_enabled().await);

    stack.enabled.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(stack.scans.load(Ordering::SeqCst), 1);
    assert!(manager.is_bluetooth_enabled().await);

    let events = drain(&mut events);
    assert_eq!(
        &events[..2],
        &[
            ManagerEvent::BluetoothStateChanged { enabled: true },
            ManagerEvent::ScanStarted { cycle: 1 },
        ]
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn discovered_device_connects_and_reports_battery() {
    let stack = stack(true);
    let manager = BluetoothManager::new(stack.clone(), config());
    manager.start().await;

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let devices = manager.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name(), Some("Thermo"));

    let mut events = manager.subscribe();
    assert_eq!(manager.select("thermo-1").await.unwrap(), ConnectOutcome::Connected);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let slot = manager.connection().await;
    assert_eq!(slot.phase, ConnectionPhase::Connected);
    assert_eq!(slot.values.battery_level, Some(85));
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        ManagerEvent::ValueDecoded { device_id, .. } if device_id == "thermo-1"
    )));

    // Selecting it again is a disconnect.
    assert_eq!(manager.select("thermo-1").await.unwrap(), ConnectOutcome::Disconnected);
    assert!(stack.connected.lock().unwrap().is_empty());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connected_device_stays_listed_after_leaving_range() {
    let stack = stack(true);
    let manager = BluetoothManager::new(stack.clone(), config());
    manager.start().await;

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    manager.select("thermo-1").await.unwrap();
    stack.in_range.lock().unwrap().clear();

    // Two more full cycles without a sighting.
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(manager.devices().await.len(), 1);

    manager.disconnect().await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(manager.devices().await.is_empty());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_surfaced_once() {
    let stack = stack(true);
    stack.unreachable.store(true, Ordering::SeqCst);
    let manager = BluetoothManager::new(stack.clone(), config());
    manager.start().await;
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let mut events = manager.subscribe();
    assert!(manager.select("thermo-1").await.is_err());

    let failures = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, ManagerEvent::ConnectFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    let slot = manager.connection().await;
    assert!(!slot.is_occupied());
    assert_eq!(slot.last_error.as_deref(), Some("Connection failed: GATT error 133"));

    manager.shutdown().await;
}
