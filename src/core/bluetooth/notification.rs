//! Notification handling for connected devices
//! This module subscribes to notifying characteristics and turns every
//! value-changed payload into a decoded registry update.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::error::Result;
use crate::core::bluetooth::protocol;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::GattCharacteristic;

/// Notification handler for characteristic updates
#[derive(Clone)]
pub struct NotificationHandler {
    adapter: Arc<dyn BluetoothAdapter>,
    registry: DeviceRegistry,
}

impl NotificationHandler {
    /// Create a new NotificationHandler
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, registry: DeviceRegistry) -> Self {
        Self { adapter, registry }
    }

    /// Subscribes to `characteristic` and forwards decoded updates until the
    /// subscription ends or `cancel_token` fires
    pub async fn setup_notifications(
        &self,
        device_id: &str,
        characteristic: &GattCharacteristic,
        cancel_token: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        info!(
            "Subscribing to notifications of {} on {}",
            protocol::describe(&characteristic.uuid),
            device_id
        );
        let stream = self.adapter.subscribe(device_id, characteristic).await?;

        let registry = self.registry.clone();
        let device_id = device_id.to_string();
        let characteristic = characteristic.clone();
        Ok(tokio::spawn(async move {
            Self::process_notifications(stream, registry, device_id, characteristic, cancel_token).await;
        }))
    }

    async fn process_notifications(
        mut stream: mpsc::UnboundedReceiver<Vec<u8>>,
        registry: DeviceRegistry,
        device_id: String,
        characteristic: GattCharacteristic,
        cancel_token: CancellationToken,
    ) {
        loop {
            let payload = tokio::select! {
                _ = cancel_token.cancelled() => break,
                payload = stream.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            debug!("Received {:?} from {}", payload, characteristic.uuid);
            match protocol::decode(&characteristic, &payload) {
                Ok(Some(value)) => {
                    registry.record_value(&device_id, value).await;
                }
                Ok(None) => debug!("Empty notification from {}", characteristic.uuid),
                Err(e) => warn!("Failed to decode notification from {}: {}", characteristic.uuid, e),
            }
        }

        info!("Notification stream of {} on {} ended", characteristic.uuid, device_id);
    }
}

/// Pumps a stack notification stream into `tx`. Returns once the receiver
/// is dropped or the stream stops yielding payloads.
#[cfg_attr(not(feature = "bluest"), allow(dead_code))]
pub(crate) async fn forward_stream<S, E>(stream: S, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    S: Stream<Item = std::result::Result<Vec<u8>, E>>,
    E: Display,
{
    tokio::pin!(stream);
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Notification receiver dropped, unsubscribing.");
                break;
            }
            result = stream.next() => match result {
                Some(Ok(payload)) => {
                    if tx.send(payload).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Notification stream error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }
}
