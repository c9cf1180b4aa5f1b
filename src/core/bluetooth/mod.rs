//! Bluetooth functionality
//! This module handles device discovery, the single-connection lifecycle and
//! reading values from the connected device's GATT table.

mod adapter;
#[cfg(feature = "bluest")]
mod bluest_adapter;
mod connection;
mod constants;
mod device;
mod error;
mod events;
mod gatt;
#[cfg(any(feature = "bluest", test))]
mod handles;
mod manager;
mod notification;
mod protocol;
mod registry;
mod scanner;
#[cfg(test)]
pub(crate) mod testing;
mod types;

// Re-export types that should be publicly accessible
pub use adapter::BluetoothAdapter;
#[cfg(feature = "bluest")]
pub use bluest_adapter::BluestAdapter;
pub use connection::ConnectionArbiter;
pub use constants::*; // Re-export all constants
pub use device::{extract_mac_address, BluetoothDevice, IdentityPolicy};
pub use error::{BluetoothError, Result};
pub use events::{EventBus, ManagerEvent};
pub use gatt::{GattWalker, WalkSummary};
pub use manager::BluetoothManager;
pub use notification::NotificationHandler;
pub use protocol::{decode, CharacteristicKind};
pub use registry::{DeviceRegistry, ReconcileSummary};
pub use scanner::{ScanCycle, ScanScheduler};
pub use types::{
    Advertisement, CharacteristicProperties, ConnectOutcome, ConnectionPhase, ConnectionSlot,
    DecodedValue, DecodedValues, GattCharacteristic, GattService,
};
