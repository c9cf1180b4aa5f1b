//! Error type shared by the Bluetooth core.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the adapter seam and the connection lifecycle.
#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Scan start/stop rejected by the stack
    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Synthetic failure when the stack does not answer a connect in time
    #[error("Connection to {device} timed out after {after:?}")]
    Timeout { device: String, after: Duration },

    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    /// Missing service/characteristic or a failed GATT operation
    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[cfg(feature = "bluest")]
    #[error("Bluetooth stack error: {0}")]
    Stack(#[from] bluest::Error),
}

/// Result alias for the Bluetooth core
pub type Result<T> = std::result::Result<T, BluetoothError>;

impl BluetoothError {
    /// Message shown to the user when a connect request fails
    pub fn user_message(&self) -> String {
        match self {
            BluetoothError::Timeout { .. } => "The device did not respond in time".to_string(),
            BluetoothError::DeviceNotFound(_) => "The device is no longer available".to_string(),
            other => other.to_string(),
        }
    }
}
