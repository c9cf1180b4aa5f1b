//! Application state management
//! This module defines and manages the global application state.

use std::sync::Arc;

use log::info;

use crate::config::AppConfig;
use crate::core::{BluetoothAdapter, BluetoothManager};

/// Global application state
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<BluetoothManager>,
    pub config: AppConfig,
}

impl AppState {
    /// Builds the manager on `adapter` and starts its background loops
    pub async fn new(adapter: Arc<dyn BluetoothAdapter>, config: AppConfig) -> Self {
        info!("Initializing BluetoothManager...");
        let manager = Arc::new(BluetoothManager::new(adapter, config.bluetooth.clone()));
        manager.start().await;
        Self {
            bluetooth_manager: manager,
            config,
        }
    }

    pub async fn shutdown(&self) {
        self.bluetooth_manager.shutdown().await;
    }
}
