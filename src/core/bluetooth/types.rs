//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::device::BluetoothDevice;

/// One sighting reported by the stack while a scan is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: i16,
}

impl Advertisement {
    pub fn new(id: impl Into<String>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi,
        }
    }

    pub fn into_device(self) -> BluetoothDevice {
        BluetoothDevice::new(self.id, self.name, self.rssi)
    }
}

/// Where the occupant of the connection slot is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A value decoded from a characteristic payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodedValue {
    /// Battery level in percent
    Battery(u8),
    SerialNumber(String),
    /// Any other readable characteristic, rendered as hex
    Generic { characteristic: Uuid, text: String },
}

/// Latest decoded values of the connected device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedValues {
    pub battery_level: Option<u8>,
    pub serial_number: Option<String>,
    pub generic: BTreeMap<Uuid, String>,
}

impl DecodedValues {
    /// Stores `value`; returns false when it was already the current value
    pub fn apply(&mut self, value: &DecodedValue) -> bool {
        match value {
            DecodedValue::Battery(level) => replace(&mut self.battery_level, *level),
            DecodedValue::SerialNumber(serial) => replace(&mut self.serial_number, serial.clone()),
            DecodedValue::Generic { characteristic, text } => {
                self.generic.insert(*characteristic, text.clone()).as_ref() != Some(text)
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

/// The single-occupancy record of the connecting/connected device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSlot {
    pub device: Option<BluetoothDevice>,
    pub phase: ConnectionPhase,
    /// Message of the most recent connect failure; kept after the slot clears
    pub last_error: Option<String>,
    pub values: DecodedValues,
}

impl ConnectionSlot {
    pub fn is_occupied(&self) -> bool {
        self.device.is_some()
    }
}

/// Result of a `select`/`connect` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    Connected,
    /// The requested device was already the occupant and got disconnected
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
}

/// Capabilities the walker cares about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}
