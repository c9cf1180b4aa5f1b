//! [`BluetoothAdapter`] backed by the `bluest` cross-platform stack.
//!
//! bluest hands out `Device`, `Service` and `Characteristic` handles; the
//! core only deals in ids and UUIDs, so the handles seen so far are cached
//! here and looked up again by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Service};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::error::{BluetoothError, Result};
use crate::core::bluetooth::handles::HandleCache;
use crate::core::bluetooth::notification::forward_stream;
use crate::core::bluetooth::types::{
    Advertisement, CharacteristicProperties, GattCharacteristic, GattService,
};

struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BluestAdapter {
    adapter: Adapter,
    devices: Arc<Mutex<HandleCache<Device>>>,
    services: Mutex<HashMap<(String, Uuid), Service>>,
    characteristics: Mutex<HashMap<(String, Uuid, Uuid), Characteristic>>,
    scan_task: tokio::sync::Mutex<Option<ScanTask>>,
}

impl BluestAdapter {
    /// Opens the default adapter of the host
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default().await.ok_or(BluetoothError::NoAdapter)?;
        info!("Bluetooth adapter found.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HandleCache::new())),
            services: Mutex::new(HashMap::new()),
            characteristics: Mutex::new(HashMap::new()),
            scan_task: tokio::sync::Mutex::new(None),
        })
    }

    fn device(&self, device_id: &str) -> Result<Device> {
        self.devices
            .lock()
            .map_err(|_| BluetoothError::Gatt("device cache poisoned".to_string()))?
            .get(device_id)
            .ok_or_else(|| BluetoothError::DeviceNotFound(device_id.to_string()))
    }

    fn remember(&self, device: &Device) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(device.id().to_string(), device.clone());
        }
    }

    fn service(&self, device_id: &str, uuid: Uuid) -> Result<Service> {
        self.services
            .lock()
            .map_err(|_| BluetoothError::Gatt("service cache poisoned".to_string()))?
            .get(&(device_id.to_string(), uuid))
            .cloned()
            .ok_or_else(|| BluetoothError::Gatt(format!("service {} not discovered", uuid)))
    }

    fn characteristic(&self, device_id: &str, characteristic: &GattCharacteristic) -> Result<Characteristic> {
        let key = (
            device_id.to_string(),
            characteristic.service_uuid,
            characteristic.uuid,
        );
        self.characteristics
            .lock()
            .map_err(|_| BluetoothError::Gatt("characteristic cache poisoned".to_string()))?
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                BluetoothError::Gatt(format!("characteristic {} not discovered", characteristic.uuid))
            })
    }

    fn pin(&self, device_id: &str) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.pin(device_id);
        }
    }

    /// Drops cached GATT handles of a device that went away and lets its
    /// device handle age out with the next scan
    fn forget_gatt(&self, device_id: &str) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.unpin(device_id);
        }
        if let Ok(mut services) = self.services.lock() {
            services.retain(|(id, _), _| id != device_id);
        }
        if let Ok(mut characteristics) = self.characteristics.lock() {
            characteristics.retain(|(id, _, _), _| id != device_id);
        }
    }

    fn advertisement(device: &Device, name: Option<String>, rssi: Option<i16>) -> Advertisement {
        let name = name.or_else(|| device.name().ok());
        Advertisement {
            id: device.id().to_string(),
            name,
            rssi: rssi.unwrap_or(i16::MIN),
        }
    }

    async fn forward_scan(
        adapter: Adapter,
        sink: mpsc::UnboundedSender<Advertisement>,
        devices: Arc<Mutex<HandleCache<Device>>>,
        started: oneshot::Sender<Result<()>>,
        cancel_token: CancellationToken,
    ) {
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => {
                let _ = started.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = started.send(Err(BluetoothError::Scan(e.to_string())));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                        if let Ok(mut devices) = devices.lock() {
                            devices.insert(discovered.device.id().to_string(), discovered.device.clone());
                        }
                        let advertisement = Self::advertisement(
                            &discovered.device,
                            discovered.adv_data.local_name.clone(),
                            discovered.rssi,
                        );
                        if sink.send(advertisement).is_err() {
                            break;
                        }
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                },
            }
        }
    }
}

#[async_trait]
impl BluetoothAdapter for BluestAdapter {
    async fn is_enabled(&self) -> bool {
        match self.adapter.is_available().await {
            Ok(available) => available,
            Err(e) => {
                warn!("Could not query the Bluetooth radio state: {}", e);
                false
            }
        }
    }

    async fn known_devices(&self) -> Result<Vec<Advertisement>> {
        let connected = self.adapter.connected_devices().await?;
        Ok(connected
            .iter()
            .map(|device| {
                self.remember(device);
                Self::advertisement(device, None, None)
            })
            .collect())
    }

    async fn start_scan(&self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<()> {
        let mut scan_task = self.scan_task.lock().await;
        if scan_task.is_some() {
            return Err(BluetoothError::Scan("scan already running".to_string()));
        }

        let (started_tx, started_rx) = oneshot::channel();
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::forward_scan(
            self.adapter.clone(),
            sink,
            self.devices.clone(),
            started_tx,
            cancel_token.clone(),
        ));

        match started_rx.await {
            Ok(Ok(())) => {
                info!("Starting bluetooth scan");
                *scan_task = Some(ScanTask { cancel_token, handle });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BluetoothError::Scan("scan task ended before starting".to_string())),
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        let Some(scan_task) = self.scan_task.lock().await.take() else {
            return Ok(());
        };
        scan_task.cancel_token.cancel();
        let joined = scan_task
            .handle
            .await
            .map_err(|e| BluetoothError::Scan(format!("scan task failed: {}", e)));

        if let Ok(mut devices) = self.devices.lock() {
            let dropped = devices.age_out();
            debug!("Dropped {} stale device handle(s), {} cached", dropped, devices.len());
        }
        joined
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        let device = self.device(device_id)?;
        self.pin(device_id);
        if device.is_connected().await {
            info!("Device {} already connected at the stack level.", device_id);
            return Ok(());
        }
        if let Err(e) = self.adapter.connect_device(&device).await {
            self.forget_gatt(device_id);
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        let device = self.device(device_id)?;
        self.forget_gatt(device_id);
        if device.is_connected().await {
            self.adapter.disconnect_device(&device).await?;
        } else {
            info!("Device {} not connected", device_id);
        }
        Ok(())
    }

    async fn is_connected(&self, device_id: &str) -> bool {
        let connected = match self.device(device_id) {
            Ok(device) => device.is_connected().await,
            Err(_) => false,
        };
        if !connected {
            self.forget_gatt(device_id);
        }
        connected
    }

    async fn services(&self, device_id: &str) -> Result<Vec<GattService>> {
        let device = self.device(device_id)?;
        let services = device.services().await?;

        let mut cache = self
            .services
            .lock()
            .map_err(|_| BluetoothError::Gatt("service cache poisoned".to_string()))?;
        Ok(services
            .into_iter()
            .map(|service| {
                let uuid = service.uuid();
                cache.insert((device_id.to_string(), uuid), service);
                GattService { uuid }
            })
            .collect())
    }

    async fn characteristics(
        &self,
        device_id: &str,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>> {
        let handle = self.service(device_id, service.uuid)?;
        let mut discovered = Vec::new();

        for characteristic in handle.characteristics().await? {
            let uuid = characteristic.uuid();
            let properties = match characteristic.properties().await {
                Ok(props) => CharacteristicProperties {
                    read: props.read,
                    notify: props.notify || props.indicate,
                },
                Err(e) => {
                    warn!("Could not read properties of {}: {}", uuid, e);
                    CharacteristicProperties::default()
                }
            };
            if let Ok(mut cache) = self.characteristics.lock() {
                cache.insert((device_id.to_string(), service.uuid, uuid), characteristic);
            }
            discovered.push(GattCharacteristic {
                service_uuid: service.uuid,
                uuid,
                properties,
            });
        }
        Ok(discovered)
    }

    async fn read(&self, device_id: &str, characteristic: &GattCharacteristic) -> Result<Vec<u8>> {
        let handle = self.characteristic(device_id, characteristic)?;
        Ok(handle.read().await?)
    }

    async fn subscribe(
        &self,
        device_id: &str,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let handle = self.characteristic(device_id, characteristic)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            let stream = match handle.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(BluetoothError::Gatt(format!(
                        "failed to enable notifications: {}",
                        e
                    ))));
                    return;
                }
            };

            forward_stream(stream, tx).await;
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BluetoothError::Gatt("notification task ended early".to_string())),
        }
    }
}
