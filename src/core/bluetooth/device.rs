//! Bluetooth device representation and related functionality

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothDevice {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The name of the device, if advertised
    pub name: Option<String>,
    /// The MAC address, when the platform id embeds one (not on macOS/iOS)
    pub address: Option<String>,
    /// The signal strength (RSSI) of the device in dBm
    pub rssi: i16,
    /// Whether the stack already knows the device (paired or system-connected)
    pub is_known: bool,
}

impl BluetoothDevice {
    /// Creates a new BluetoothDevice instance
    pub fn new(id: impl Into<String>, name: Option<String>, rssi: i16) -> Self {
        let id = id.into();
        let address = extract_mac_address(&id);
        Self {
            id,
            name,
            address,
            rssi,
            is_known: false,
        }
    }

    /// The trimmed display name, or `None` when the name is absent or blank
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Only devices with a display name are listed to the user
    pub fn is_visible(&self) -> bool {
        self.display_name().is_some()
    }

    /// Returns the key this device is de-duplicated by under `policy`
    pub fn key(&self, policy: IdentityPolicy) -> String {
        match policy {
            IdentityPolicy::Address => self.id.clone(),
            IdentityPolicy::TrimmedName => self
                .display_name()
                .map(str::to_string)
                .unwrap_or_else(|| self.id.clone()),
        }
    }
}

/// How devices are told apart.
///
/// `TrimmedName` exists for stacks that do not hand out a stable identifier.
/// It is strictly weaker: two physical devices advertising the same name
/// are merged into one entry and cannot be distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    #[default]
    Address,
    TrimmedName,
}

/// Pulls the last MAC-looking token out of a platform device id
/// (e.g. `BluetoothLE#BluetoothLEb8:31:b5:aa:bb:cc-2c:26:17:01:02:03`).
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}
