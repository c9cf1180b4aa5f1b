//! The seam to the platform Bluetooth stack.
//!
//! Components never talk to a stack directly; they hold an
//! `Arc<dyn BluetoothAdapter>` handed to them at construction. Device-found,
//! characteristic-updated and similar stack callbacks are delivered through
//! channels instead of event handlers.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::bluetooth::error::Result;
use crate::core::bluetooth::types::{Advertisement, GattCharacteristic, GattService};

#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    /// Whether the radio is currently switched on
    async fn is_enabled(&self) -> bool;

    /// Devices the stack already knows about (paired or connected by the system)
    async fn known_devices(&self) -> Result<Vec<Advertisement>>;

    /// Starts discovery; every sighting is sent into `sink` until `stop_scan`
    async fn start_scan(&self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<()>;

    /// Stops discovery. Returns once no further sightings will be sent
    async fn stop_scan(&self) -> Result<()>;

    /// Connects to the device; may take an unbounded, platform-determined time
    async fn connect(&self, device_id: &str) -> Result<()>;

    async fn disconnect(&self, device_id: &str) -> Result<()>;

    /// Whether the stack still reports a live link to the device
    async fn is_connected(&self, device_id: &str) -> bool;

    async fn services(&self, device_id: &str) -> Result<Vec<GattService>>;

    async fn characteristics(
        &self,
        device_id: &str,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>>;

    async fn read(&self, device_id: &str, characteristic: &GattCharacteristic) -> Result<Vec<u8>>;

    /// Subscribes to value-changed notifications. The receiver closes when the
    /// subscription ends (disconnect or stack error)
    async fn subscribe(
        &self,
        device_id: &str,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;
}
