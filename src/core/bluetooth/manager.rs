//! Bluetooth manager
//! This module provides the main interface for bluetooth operations: it owns
//! the registry, the scan loop and the connection arbiter, and is the only
//! type the UI layer talks to.

use std::sync::Arc;

use log::{error, info};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::connection::ConnectionArbiter;
use crate::core::bluetooth::device::BluetoothDevice;
use crate::core::bluetooth::error::{BluetoothError, Result};
use crate::core::bluetooth::events::{EventBus, ManagerEvent};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::ScanScheduler;
use crate::core::bluetooth::types::{ConnectOutcome, ConnectionSlot};

struct Supervisor {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Manages Bluetooth operations
pub struct BluetoothManager {
    events: EventBus,
    registry: DeviceRegistry,
    arbiter: ConnectionArbiter,
    scanner: Mutex<ScanScheduler>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager on top of `adapter`. Nothing runs
    /// until [`start`](Self::start) is called.
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, config: BluetoothConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let registry = DeviceRegistry::new(events.clone(), config.identity);
        let arbiter = ConnectionArbiter::new(adapter.clone(), registry.clone(), config.clone());
        let scanner = ScanScheduler::new(adapter, registry.clone(), events.clone(), config);

        Self {
            events,
            registry,
            arbiter,
            scanner: Mutex::new(scanner),
            supervisor: Mutex::new(None),
        }
    }

    /// Receives every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Starts the scan loop and the link supervisor
    pub async fn start(&self) {
        self.scanner.lock().await.start();

        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return;
        }
        let cancel_token = CancellationToken::new();
        let arbiter = self.arbiter.clone();
        let token = cancel_token.clone();
        let handle = tokio::spawn(async move {
            arbiter.run_link_supervisor(token).await;
        });
        *supervisor = Some(Supervisor { cancel_token, handle });
        info!("Bluetooth manager started.");
    }

    /// Stops the background loops and releases the connected device
    pub async fn shutdown(&self) {
        info!("Shutting down Bluetooth manager.");
        self.scanner.lock().await.stop().await;

        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.cancel_token.cancel();
            if let Err(e) = supervisor.handle.await {
                error!("Link supervisor finished with a join error: {:?}", e);
            }
        }

        self.disconnect().await;
    }

    /// User selection of the device with registry key `key`: connects it,
    /// or disconnects it when it is already the selected device.
    pub async fn select(&self, key: &str) -> Result<ConnectOutcome> {
        let device = self
            .registry
            .find(key)
            .await
            .ok_or_else(|| BluetoothError::DeviceNotFound(key.to_string()))?;
        self.arbiter.connect(&device).await
    }

    /// Disconnects whatever occupies the connection slot.
    /// Returns false when nothing was connected.
    pub async fn disconnect(&self) -> bool {
        match self.registry.occupant().await {
            Some(device) => self.arbiter.disconnect(&device).await,
            None => false,
        }
    }

    /// Visible devices, strongest signal first
    pub async fn devices(&self) -> Vec<BluetoothDevice> {
        self.registry.devices().await
    }

    pub async fn connection(&self) -> ConnectionSlot {
        self.registry.connection().await
    }

    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.registry.is_bluetooth_enabled().await
    }

    pub async fn is_scanning(&self) -> bool {
        self.scanner.lock().await.is_running()
    }
}
