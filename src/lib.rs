//! BLE device manager library
//! Discovers nearby Bluetooth Low Energy devices, keeps at most one of them
//! connected and reports values read from its GATT table.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use crate::core::bluetooth::{
    BluetoothAdapter, BluetoothDevice, BluetoothError, BluetoothManager, ConnectOutcome,
    ConnectionPhase, ConnectionSlot, DecodedValue, ManagerEvent,
};
