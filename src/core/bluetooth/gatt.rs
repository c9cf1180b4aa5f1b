//! GATT protocol walker
//!
//! Once a device is connected, walks services -> characteristics, reads
//! what is readable, subscribes to what notifies and keeps the battery level
//! fresh by polling it for the lifetime of the connection. A failure on one
//! characteristic is logged and skipped; it never ends the walk or touches
//! the connection phase.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::device::BluetoothDevice;
use crate::core::bluetooth::error::{BluetoothError, Result};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::protocol::{self, CharacteristicKind};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{ConnectionPhase, DecodedValue, GattCharacteristic};

/// Counters of one walk, mostly for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub services: usize,
    pub characteristics: usize,
    pub values_reported: usize,
    pub subscriptions: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct GattWalker {
    adapter: Arc<dyn BluetoothAdapter>,
    registry: DeviceRegistry,
    notification_handler: NotificationHandler,
    battery_poll_interval: Duration,
    link_lost: mpsc::UnboundedSender<BluetoothDevice>,
}

impl GattWalker {
    /// `link_lost` receives the device when battery polling finds the link gone
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        registry: DeviceRegistry,
        battery_poll_interval: Duration,
        link_lost: mpsc::UnboundedSender<BluetoothDevice>,
    ) -> Self {
        let notification_handler = NotificationHandler::new(adapter.clone(), registry.clone());
        Self {
            adapter,
            registry,
            notification_handler,
            battery_poll_interval,
            link_lost,
        }
    }

    /// Walks the device's attribute table. Background work started here
    /// (battery polling, notification forwarding) stops with `cancel_token`.
    pub async fn walk(&self, device: &BluetoothDevice, cancel_token: &CancellationToken) -> WalkSummary {
        let mut summary = WalkSummary::default();

        if self.registry.phase_of(device).await != Some(ConnectionPhase::Connected) {
            debug!("Skipping GATT walk of {}: not the connected device", device.id);
            return summary;
        }

        info!("Discovering services of {}...", device.id);
        let services = match self.adapter.services(&device.id).await {
            Ok(services) if services.is_empty() => {
                warn!("No services found on {}", device.id);
                return summary;
            }
            Ok(services) => services,
            Err(e) => {
                warn!("Service discovery on {} failed: {}", device.id, e);
                return summary;
            }
        };

        for service in &services {
            if cancel_token.is_cancelled() {
                break;
            }
            summary.services += 1;
            debug!("Service: {}", service.uuid);

            let characteristics = match self.adapter.characteristics(&device.id, service).await {
                Ok(characteristics) => characteristics,
                Err(e) => {
                    warn!("Failed to list characteristics of service {}: {}", service.uuid, e);
                    summary.failures += 1;
                    continue;
                }
            };
            if characteristics.is_empty() {
                debug!("No characteristics found for service {}", service.uuid);
            }

            for characteristic in &characteristics {
                if cancel_token.is_cancelled() {
                    break;
                }
                summary.characteristics += 1;
                self.visit(device, characteristic, cancel_token, &mut summary).await;
            }
        }

        info!(
            "GATT walk of {} done: {} service(s), {} characteristic(s), {} value(s), {} subscription(s), {} failure(s)",
            device.id,
            summary.services,
            summary.characteristics,
            summary.values_reported,
            summary.subscriptions,
            summary.failures
        );
        summary
    }

    async fn visit(
        &self,
        device: &BluetoothDevice,
        characteristic: &GattCharacteristic,
        cancel_token: &CancellationToken,
        summary: &mut WalkSummary,
    ) {
        let kind = CharacteristicKind::of(characteristic);
        debug!(
            "Characteristic: {} ({:?}, {:?})",
            characteristic.uuid, kind, characteristic.properties
        );

        if characteristic.properties.read {
            if kind == CharacteristicKind::BatteryLevel {
                self.spawn_battery_poll(device.clone(), characteristic.clone(), cancel_token.child_token());
            } else {
                match self.read_value(device, characteristic).await {
                    Ok(Some(value)) => {
                        summary.values_reported += 1;
                        self.registry.record_value(&device.id, value).await;
                    }
                    Ok(None) => debug!("No value returned for {}", characteristic.uuid),
                    Err(e) => {
                        warn!("Reading {} failed: {}", protocol::describe(&characteristic.uuid), e);
                        summary.failures += 1;
                    }
                }
            }
        }

        if characteristic.properties.notify {
            match self
                .notification_handler
                .setup_notifications(&device.id, characteristic, cancel_token.child_token())
                .await
            {
                Ok(_) => summary.subscriptions += 1,
                Err(e) => {
                    warn!("Subscribing to {} failed: {}", characteristic.uuid, e);
                    summary.failures += 1;
                }
            }
        }
    }

    async fn read_value(
        &self,
        device: &BluetoothDevice,
        characteristic: &GattCharacteristic,
    ) -> Result<Option<DecodedValue>> {
        let payload = self.adapter.read(&device.id, characteristic).await?;
        protocol::decode(characteristic, &payload)
    }

    fn spawn_battery_poll(
        &self,
        device: BluetoothDevice,
        characteristic: GattCharacteristic,
        cancel_token: CancellationToken,
    ) {
        let walker = self.clone();
        tokio::spawn(async move {
            walker.poll_battery(device, characteristic, cancel_token).await;
        });
    }

    /// Re-reads the battery level every poll interval (first read at once)
    /// until cancelled or the stack reports the link gone
    async fn poll_battery(
        self,
        device: BluetoothDevice,
        characteristic: GattCharacteristic,
        cancel_token: CancellationToken,
    ) {
        info!(
            "Polling battery level of {} every {:?}",
            device.id, self.battery_poll_interval
        );
        let mut ticker = tokio::time::interval(self.battery_poll_interval);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.adapter.is_connected(&device.id).await {
                info!(
                    "Device {} is not connected anymore, stopping battery polling.",
                    device.id
                );
                let _ = self.link_lost.send(device.clone());
                break;
            }

            let level = self
                .adapter
                .read(&device.id, &characteristic)
                .await
                .and_then(|payload| protocol::decode_battery_level(&payload));
            match level {
                Ok(Some(level)) => {
                    debug!("Battery level of {}: {}%", device.id, level);
                    self.registry.record_value(&device.id, DecodedValue::Battery(level)).await;
                }
                Ok(None) => debug!("Battery Level characteristic of {} is empty.", device.id),
                Err(BluetoothError::Decode(reason)) => warn!("Ignoring battery reading: {}", reason),
                Err(e) => warn!("Failed to read battery level of {}: {}", device.id, e),
            }
        }

        debug!("Battery polling of {} stopped", device.id);
    }
}
