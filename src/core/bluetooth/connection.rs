//! Connection arbiter
//! Serializes connect/disconnect requests and keeps at most one device
//! connected at any time.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::device::BluetoothDevice;
use crate::core::bluetooth::error::{BluetoothError, Result};
use crate::core::bluetooth::gatt::GattWalker;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{ConnectOutcome, ConnectionPhase};

struct ArbiterInner {
    adapter: Arc<dyn BluetoothAdapter>,
    registry: DeviceRegistry,
    walker: GattWalker,
    config: BluetoothConfig,
    /// Held for the whole of every connect/disconnect sequence
    operation_lock: Mutex<()>,
    /// Cancels the GATT work of a connected device, keyed by device id
    gatt_tasks: Mutex<HashMap<String, CancellationToken>>,
    link_lost: Mutex<Option<mpsc::UnboundedReceiver<BluetoothDevice>>>,
}

/// Connection manager enforcing the single connection slot
#[derive(Clone)]
pub struct ConnectionArbiter {
    inner: Arc<ArbiterInner>,
}

impl ConnectionArbiter {
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, registry: DeviceRegistry, config: BluetoothConfig) -> Self {
        let (link_lost_tx, link_lost_rx) = mpsc::unbounded_channel();
        let walker = GattWalker::new(
            adapter.clone(),
            registry.clone(),
            config.battery_poll_interval(),
            link_lost_tx,
        );
        Self {
            inner: Arc::new(ArbiterInner {
                adapter,
                registry,
                walker,
                config,
                operation_lock: Mutex::new(()),
                gatt_tasks: Mutex::new(HashMap::new()),
                link_lost: Mutex::new(Some(link_lost_rx)),
            }),
        }
    }

    /// Connects to `device`, or disconnects it if it already holds the slot.
    ///
    /// A different occupant is fully disconnected first. On failure the slot
    /// is left empty, the reason is kept in `last_error` and a
    /// `ConnectFailed` event is emitted before the error is returned.
    pub async fn connect(&self, device: &BluetoothDevice) -> Result<ConnectOutcome> {
        let _guard = self.inner.operation_lock.lock().await;
        let registry = &self.inner.registry;

        if let Some(occupant) = registry.occupant().await {
            if registry.key_of(&occupant) == registry.key_of(device) {
                info!("{} is already selected, disconnecting", occupant.id);
                self.disconnect_locked(&occupant).await;
                return Ok(ConnectOutcome::Disconnected);
            }
            info!("Releasing {} before connecting to {}", occupant.id, device.id);
            self.disconnect_locked(&occupant).await;
        }

        if !registry.occupy_slot(device).await {
            return Err(BluetoothError::ConnectFailed("connection slot is busy".to_string()));
        }

        match self.connect_with_retry(device).await {
            Ok(()) => {
                info!("Successfully connected to {}", device.id);
                registry.set_phase(device, ConnectionPhase::Connected).await;
                self.spawn_walk(device).await;
                Ok(ConnectOutcome::Connected)
            }
            Err(e) => {
                warn!("Connecting to {} failed: {}", device.id, e);
                if let Err(cleanup) = self.inner.adapter.disconnect(&device.id).await {
                    debug!("Cleanup disconnect of {} failed: {}", device.id, cleanup);
                }
                registry.record_failure(device, &e.user_message()).await;
                Err(e)
            }
        }
    }

    /// Disconnects `device`. Stack errors are only logged; the slot is
    /// cleared regardless. Returns whether `device` held the slot.
    pub async fn disconnect(&self, device: &BluetoothDevice) -> bool {
        let _guard = self.inner.operation_lock.lock().await;
        self.disconnect_locked(device).await
    }

    /// Drains link-loss reports from the battery poller until cancelled
    pub async fn run_link_supervisor(&self, cancel_token: CancellationToken) {
        let Some(mut link_lost) = self.inner.link_lost.lock().await.take() else {
            warn!("Link supervisor is already running");
            return;
        };

        loop {
            let device = tokio::select! {
                _ = cancel_token.cancelled() => break,
                device = link_lost.recv() => match device {
                    Some(device) => device,
                    None => break,
                },
            };
            self.handle_link_lost(&device).await;
        }

        *self.inner.link_lost.lock().await = Some(link_lost);
        debug!("Link supervisor stopped");
    }

    /// Clears the slot after the stack dropped the link of the connected device
    pub async fn handle_link_lost(&self, device: &BluetoothDevice) -> bool {
        let _guard = self.inner.operation_lock.lock().await;
        let registry = &self.inner.registry;

        if registry.phase_of(device).await != Some(ConnectionPhase::Connected) {
            debug!("Ignoring stale link loss report for {}", device.id);
            return false;
        }
        warn!("Device {} lost connection", device.id);
        self.cancel_gatt(&device.id).await;
        registry.clear_slot(device).await
    }

    async fn connect_with_retry(&self, device: &BluetoothDevice) -> Result<()> {
        let attempts = self.inner.config.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.try_connect(device).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        let delay = self.inner.config.connect_retry_delay();
                        info!("Retrying connection in {:?}...", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BluetoothError::ConnectFailed(format!("failed to connect after {} attempts", attempts))
        }))
    }

    async fn try_connect(&self, device: &BluetoothDevice) -> Result<()> {
        info!(
            "Initiating connection to {} ({})...",
            device.display_name().unwrap_or("Unknown"),
            device.id
        );
        let connecting = self.inner.adapter.connect(&device.id);
        match self.inner.config.connect_timeout() {
            Some(after) => tokio::time::timeout(after, connecting)
                .await
                .map_err(|_| BluetoothError::Timeout {
                    device: device.id.clone(),
                    after,
                })?,
            None => connecting.await,
        }
    }

    async fn disconnect_locked(&self, device: &BluetoothDevice) -> bool {
        self.cancel_gatt(&device.id).await;

        info!("Disconnecting from device {}", device.id);
        match self.inner.adapter.disconnect(&device.id).await {
            Ok(()) => info!("Successfully disconnected"),
            Err(e) => warn!("Disconnecting {} reported an error: {}", device.id, e),
        }

        self.inner.registry.clear_slot(device).await
    }

    async fn spawn_walk(&self, device: &BluetoothDevice) {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .gatt_tasks
            .lock()
            .await
            .insert(device.id.clone(), cancel_token.clone())
        {
            previous.cancel();
        }

        let walker = self.inner.walker.clone();
        let device = device.clone();
        tokio::spawn(async move {
            walker.walk(&device, &cancel_token).await;
        });
    }

    async fn cancel_gatt(&self, device_id: &str) {
        if let Some(token) = self.inner.gatt_tasks.lock().await.remove(device_id) {
            debug!("Stopping GATT tasks of {}", device_id);
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE};
    use crate::core::bluetooth::device::IdentityPolicy;
    use crate::core::bluetooth::events::{EventBus, ManagerEvent};
    use crate::core::bluetooth::testing::{ConnectBehavior, FakeAdapter};
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;

    fn device(id: &str) -> BluetoothDevice {
        BluetoothDevice::new(id, Some(format!("Device {}", id)), -60)
    }

    fn arbiter_with(config: BluetoothConfig) -> (ConnectionArbiter, Arc<FakeAdapter>, DeviceRegistry, Receiver<ManagerEvent>) {
        let adapter = Arc::new(FakeAdapter::new());
        let events = EventBus::new(64);
        let rx = events.subscribe();
        let registry = DeviceRegistry::new(events, IdentityPolicy::Address);
        let arbiter = ConnectionArbiter::new(adapter.clone(), registry.clone(), config);
        (arbiter, adapter, registry, rx)
    }

    fn arbiter() -> (ConnectionArbiter, Arc<FakeAdapter>, DeviceRegistry, Receiver<ManagerEvent>) {
        arbiter_with(BluetoothConfig::default())
    }

    /// Slot transitions as (occupant id, phase)
    fn slot_changes(rx: &mut Receiver<ManagerEvent>) -> Vec<(Option<String>, ConnectionPhase)> {
        let mut changes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ManagerEvent::ConnectionChanged(slot) = event {
                changes.push((slot.device.map(|d| d.id), slot.phase));
            }
        }
        changes
    }

    #[tokio::test]
    async fn connect_moves_through_connecting_to_connected() {
        let (arbiter, adapter, registry, mut rx) = arbiter();
        let a = device("a");

        assert_eq!(arbiter.connect(&a).await.unwrap(), ConnectOutcome::Connected);
        assert_eq!(
            slot_changes(&mut rx),
            vec![
                (Some("a".to_string()), ConnectionPhase::Connecting),
                (Some("a".to_string()), ConnectionPhase::Connected),
            ]
        );
        assert!(adapter.connected_devices().contains("a"));
        assert_eq!(registry.phase_of(&a).await, Some(ConnectionPhase::Connected));
    }

    #[tokio::test]
    async fn selecting_the_occupant_again_disconnects_it() {
        let (arbiter, adapter, registry, _rx) = arbiter();
        let a = device("a");

        arbiter.connect(&a).await.unwrap();
        assert_eq!(arbiter.connect(&a).await.unwrap(), ConnectOutcome::Disconnected);

        assert!(!registry.connection().await.is_occupied());
        assert!(adapter.connected_devices().is_empty());
        assert_eq!(adapter.calls(), vec!["connect a", "disconnect a"]);
    }

    #[tokio::test]
    async fn switching_devices_releases_the_first_one() {
        let (arbiter, adapter, registry, mut rx) = arbiter();

        arbiter.connect(&device("a")).await.unwrap();
        arbiter.connect(&device("b")).await.unwrap();

        assert_eq!(adapter.calls(), vec!["connect a", "disconnect a", "connect b"]);
        assert_eq!(
            slot_changes(&mut rx),
            vec![
                (Some("a".to_string()), ConnectionPhase::Connecting),
                (Some("a".to_string()), ConnectionPhase::Connected),
                (None, ConnectionPhase::Disconnected),
                (Some("b".to_string()), ConnectionPhase::Connecting),
                (Some("b".to_string()), ConnectionPhase::Connected),
            ]
        );
        assert_eq!(registry.occupant().await.map(|d| d.id), Some("b".to_string()));
        assert_eq!(adapter.max_connected(), 1);
    }

    #[tokio::test]
    async fn failed_connect_is_reported_once() {
        let (arbiter, adapter, registry, mut rx) = arbiter();
        adapter.set_connect_behavior("a", ConnectBehavior::Fail("Status 133".to_string()));

        let err = arbiter.connect(&device("a")).await.unwrap_err();
        assert!(matches!(err, BluetoothError::ConnectFailed(_)));

        let slot = registry.connection().await;
        assert!(!slot.is_occupied());
        assert_eq!(slot.last_error.as_deref(), Some("Connection failed: Status 133"));

        let failures: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                ManagerEvent::ConnectFailed { device, reason } => Some((device.id, reason)),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![("a".to_string(), "Connection failed: Status 133".to_string())]);
        assert_eq!(adapter.calls(), vec!["connect a", "disconnect a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_connect_times_out() {
        let (arbiter, adapter, registry, _rx) = arbiter();
        adapter.set_connect_behavior("a", ConnectBehavior::Hang);

        let started = tokio::time::Instant::now();
        let err = arbiter.connect(&device("a")).await.unwrap_err();

        assert!(matches!(err, BluetoothError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
        let slot = registry.connection().await;
        assert!(!slot.is_occupied());
        assert_eq!(slot.last_error.as_deref(), Some("The device did not respond in time"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_retried_up_to_the_configured_attempts() {
        let config = BluetoothConfig {
            connect_attempts: 3,
            ..BluetoothConfig::default()
        };
        let (arbiter, adapter, _registry, _rx) = arbiter_with(config);
        adapter.set_connect_behavior("a", ConnectBehavior::Fail("busy".to_string()));

        assert!(arbiter.connect(&device("a")).await.is_err());
        let attempts = adapter.calls().iter().filter(|c| *c == "connect a").count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn disconnect_error_still_clears_the_slot() {
        let (arbiter, adapter, registry, _rx) = arbiter();
        let a = device("a");
        arbiter.connect(&a).await.unwrap();
        adapter.fail_disconnect(true);

        assert!(arbiter.disconnect(&a).await);
        assert!(!registry.connection().await.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_never_overlap() {
        let (arbiter, adapter, registry, _rx) = arbiter();
        adapter.set_connect_behavior("a", ConnectBehavior::Delay(Duration::from_millis(300)));
        adapter.set_connect_behavior("b", ConnectBehavior::Delay(Duration::from_millis(100)));

        let (a, b) = (device("a"), device("b"));
        let (first, second) = tokio::join!(arbiter.connect(&a), arbiter.connect(&b));
        assert!(first.is_ok());
        assert!(second.is_ok());

        assert_eq!(adapter.max_connected(), 1);
        assert_eq!(adapter.connected_devices().len(), 1);
        assert!(registry.connection().await.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_empties_the_slot() {
        let (arbiter, adapter, registry, mut rx) = arbiter();
        adapter.add_characteristic(UUID_BATTERY_SERVICE, UUID_BATTERY_LEVEL, true, false);
        adapter.set_read(UUID_BATTERY_LEVEL, Ok(vec![90]));

        let cancel = CancellationToken::new();
        let supervisor = arbiter.clone();
        let supervisor_token = cancel.clone();
        tokio::spawn(async move { supervisor.run_link_supervisor(supervisor_token).await });

        arbiter.connect(&device("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.connection().await.values.battery_level, Some(90));

        adapter.drop_link("a");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!registry.connection().await.is_occupied());
        assert_eq!(
            slot_changes(&mut rx).last(),
            Some(&(None, ConnectionPhase::Disconnected))
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn stale_link_loss_is_ignored() {
        let (arbiter, _adapter, registry, _rx) = arbiter();
        arbiter.connect(&device("b")).await.unwrap();

        assert!(!arbiter.handle_link_lost(&device("a")).await);
        assert_eq!(registry.occupant().await.map(|d| d.id), Some("b".to_string()));
    }
}
