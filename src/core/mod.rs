//! Core functionality
//! Everything that talks to the Bluetooth stack lives here; the rest of the
//! crate only sees the manager facade and its events.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BluetoothAdapter, BluetoothManager, ManagerEvent};
