//! Decoding of characteristic payloads into user-facing values.

use uuid::Uuid;

use crate::core::bluetooth::constants::{
    MAX_BATTERY_LEVEL, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_DEVICE_INFORMATION_SERVICE,
    UUID_SERIAL_NUMBER,
};
use crate::core::bluetooth::error::{BluetoothError, Result};
use crate::core::bluetooth::types::{DecodedValue, GattCharacteristic};

/// Which decode policy applies to a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    /// Battery Service / Battery Level, polled while connected
    BatteryLevel,
    /// Device Information / Serial Number String, read once
    SerialNumber,
    Generic,
}

impl CharacteristicKind {
    pub fn of(characteristic: &GattCharacteristic) -> Self {
        match (characteristic.service_uuid, characteristic.uuid) {
            (UUID_BATTERY_SERVICE, UUID_BATTERY_LEVEL) => Self::BatteryLevel,
            (UUID_DEVICE_INFORMATION_SERVICE, UUID_SERIAL_NUMBER) => Self::SerialNumber,
            _ => Self::Generic,
        }
    }
}

/// Decodes a payload of `characteristic`.
///
/// `Ok(None)` means the payload carried nothing to report (empty read).
pub fn decode(characteristic: &GattCharacteristic, payload: &[u8]) -> Result<Option<DecodedValue>> {
    match CharacteristicKind::of(characteristic) {
        CharacteristicKind::BatteryLevel => Ok(decode_battery_level(payload)?.map(DecodedValue::Battery)),
        CharacteristicKind::SerialNumber => {
            Ok(decode_serial_number(payload)?.map(DecodedValue::SerialNumber))
        }
        CharacteristicKind::Generic => Ok(format_hex(payload).map(|text| DecodedValue::Generic {
            characteristic: characteristic.uuid,
            text,
        })),
    }
}

/// Single unsigned byte, 0-100 percent
pub fn decode_battery_level(payload: &[u8]) -> Result<Option<u8>> {
    match payload.first() {
        None => Ok(None),
        Some(&level) if level <= MAX_BATTERY_LEVEL => Ok(Some(level)),
        Some(&level) => Err(BluetoothError::Decode(format!(
            "battery level {} is out of range",
            level
        ))),
    }
}

/// UTF-8 text; trailing NULs and surrounding whitespace are dropped
pub fn decode_serial_number(payload: &[u8]) -> Result<Option<String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| BluetoothError::Decode(format!("serial number is not UTF-8: {}", e)))?;
    let text = text.trim_end_matches('\0').trim();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text.to_string()))
    }
}

/// Renders bytes as `"55 AA 01"`
pub fn format_hex(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    Some(
        payload
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Short label used in log lines
pub fn describe(uuid: &Uuid) -> String {
    match *uuid {
        UUID_BATTERY_LEVEL => "Battery Level".to_string(),
        UUID_SERIAL_NUMBER => "Serial Number".to_string(),
        other => other.to_string(),
    }
}
