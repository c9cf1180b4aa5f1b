//! UI commands
//! This module defines all the commands the UI layer can invoke. Errors are
//! flattened to strings at this boundary.

use std::str::FromStr;

use crate::core::bluetooth::{BluetoothDevice, ConnectOutcome, ConnectionSlot};
use crate::state::AppState;

/// Selects a device: connects it, or disconnects it if it is already selected
///
/// # Arguments
/// * `app_state` - The application state
/// * `device_key` - Registry key of the device (address, id or name, per identity policy)
pub async fn select_device(app_state: &AppState, device_key: &str) -> Result<ConnectOutcome, String> {
    app_state
        .bluetooth_manager
        .select(device_key)
        .await
        .map_err(|e| e.user_message())
}

/// Visible devices, strongest signal first
pub async fn list_devices(app_state: &AppState) -> Result<Vec<BluetoothDevice>, String> {
    Ok(app_state.bluetooth_manager.devices().await)
}

pub async fn connection_status(app_state: &AppState) -> Result<ConnectionSlot, String> {
    Ok(app_state.bluetooth_manager.connection().await)
}

/// Disconnects the selected device, if any
pub async fn disconnect(app_state: &AppState) -> Result<(), String> {
    if app_state.bluetooth_manager.disconnect().await {
        Ok(())
    } else {
        Err("No device connected".to_string())
    }
}

pub async fn bluetooth_enabled(app_state: &AppState) -> Result<bool, String> {
    Ok(app_state.bluetooth_manager.is_bluetooth_enabled().await)
}

/// One line typed on the console front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(String),
    Disconnect,
    List,
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let argument = rest.trim();

        match verb.to_ascii_lowercase().as_str() {
            "select" | "s" if !argument.is_empty() => Ok(Self::Select(argument.to_string())),
            "select" | "s" => Err("usage: select <device>".to_string()),
            "disconnect" | "d" => Ok(Self::Disconnect),
            "list" | "ls" | "l" => Ok(Self::List),
            "status" => Ok(Self::Status),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}
