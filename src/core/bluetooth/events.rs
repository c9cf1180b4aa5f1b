//! Change notifications pushed to the UI layer.
//!
//! Everything the registry or the arbiter mutates is announced here, in the
//! order the mutation happened. Consumers subscribe to an [`EventBus`] and
//! receive every event emitted after subscribing.

use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::bluetooth::device::BluetoothDevice;
use crate::core::bluetooth::types::{ConnectionSlot, DecodedValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ManagerEvent {
    BluetoothStateChanged { enabled: bool },
    ScanStarted { cycle: u64 },
    ScanCompleted { cycle: u64, observed: usize },
    /// A paired or system-connected device reported by the stack
    KnownDeviceFound(BluetoothDevice),
    DeviceAdded(BluetoothDevice),
    DeviceUpdated(BluetoothDevice),
    DeviceRemoved { key: String },
    ConnectionChanged(ConnectionSlot),
    /// The one failure that is meant to be shown to the user
    ConnectFailed { device: BluetoothDevice, reason: String },
    ValueDecoded { device_id: String, value: DecodedValue },
}

/// Fan-out channel for [`ManagerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ManagerEvent) {
        trace!("emit {:?}", event);
        // No subscriber is not an error: the UI may attach later and poll snapshots.
        let _ = self.sender.send(event);
    }
}
