//! Device registry
//!
//! Owns the canonical set of visible devices, the connection slot and the
//! Bluetooth-enabled flag. Each mutation is announced on the [`EventBus`]
//! while the state lock is still held, so observers see mutations in the
//! order they happened.
//!
//! Writers: the scan scheduler (`reconcile`, `upsert_signal`,
//! `record_known`, `set_bluetooth_enabled`), the connection arbiter (slot
//! methods) and the GATT walker (`record_value`).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::core::bluetooth::device::{BluetoothDevice, IdentityPolicy};
use crate::core::bluetooth::events::{EventBus, ManagerEvent};
use crate::core::bluetooth::types::{ConnectionPhase, ConnectionSlot, DecodedValue, DecodedValues};

#[derive(Debug, Default)]
struct RegistryState {
    visible: HashMap<String, BluetoothDevice>,
    known: HashSet<String>,
    slot: ConnectionSlot,
    bluetooth_enabled: bool,
}

/// What a `reconcile` call changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    state: Arc<Mutex<RegistryState>>,
    events: EventBus,
    identity: IdentityPolicy,
}

impl DeviceRegistry {
    pub fn new(events: EventBus, identity: IdentityPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            events,
            identity,
        }
    }

    pub fn key_of(&self, device: &BluetoothDevice) -> String {
        device.key(self.identity)
    }

    /// Key of a fresh sighting. Under [`IdentityPolicy::TrimmedName`] a
    /// sighting without a name belongs to the entry already holding its id.
    pub async fn key_for_sighting(&self, device: &BluetoothDevice) -> String {
        let state = self.state.lock().await;
        self.sighting_key_locked(&state, device)
    }

    /// Merges one completed scan cycle into the visible set.
    ///
    /// Unknown named devices are added, known ones refreshed, and visible
    /// devices missing from `observed` removed unless they occupy the slot.
    pub async fn reconcile(&self, observed: impl IntoIterator<Item = BluetoothDevice>) -> ReconcileSummary {
        let mut state = self.state.lock().await;
        let mut incoming: BTreeMap<String, BluetoothDevice> = BTreeMap::new();
        for mut device in observed {
            let key = self.sighting_key_locked(&state, &device);
            if let Some(previous) = incoming.get(&key) {
                if !device.is_visible() {
                    device.name = previous.name.clone();
                }
            }
            incoming.insert(key, device);
        }

        let connected_key = state.slot.device.as_ref().map(|d| d.key(self.identity));
        let mut summary = ReconcileSummary::default();

        let mut stale: Vec<String> = state
            .visible
            .keys()
            .filter(|key| !incoming.contains_key(*key) && connected_key.as_deref() != Some(key.as_str()))
            .cloned()
            .collect();
        stale.sort();
        for key in stale {
            state.visible.remove(&key);
            debug!("Device {} left the visible set", key);
            summary.removed += 1;
            self.events.emit(ManagerEvent::DeviceRemoved { key });
        }

        for (key, seen) in incoming {
            match state.visible.get_mut(&key) {
                Some(existing) => {
                    if merge_sighting(existing, &seen) {
                        summary.updated += 1;
                        self.events.emit(ManagerEvent::DeviceUpdated(existing.clone()));
                    }
                }
                None if seen.is_visible() => {
                    debug!("Device {} ({:?}) joined the visible set", key, seen.display_name());
                    summary.added += 1;
                    state.visible.insert(key, seen.clone());
                    self.events.emit(ManagerEvent::DeviceAdded(seen));
                }
                None => {}
            }
        }

        if !summary.is_empty() {
            info!(
                "Reconciled scan cycle: {} added, {} updated, {} removed, {} visible",
                summary.added,
                summary.updated,
                summary.removed,
                state.visible.len()
            );
        }
        summary
    }

    /// Refreshes the signal strength of a visible device. Unknown devices are
    /// ignored, never inserted. Returns whether anything changed.
    pub async fn upsert_signal(&self, key: &str, rssi: i16) -> bool {
        let mut state = self.state.lock().await;
        match state.visible.get_mut(key) {
            Some(device) if device.rssi != rssi => {
                device.rssi = rssi;
                self.events.emit(ManagerEvent::DeviceUpdated(device.clone()));
                true
            }
            _ => false,
        }
    }

    /// Flags a device the stack already knows (paired or system-connected).
    /// Announced once per device for the life of the registry.
    pub async fn record_known(&self, device: &BluetoothDevice) {
        let key = device.key(self.identity);
        let mut state = self.state.lock().await;
        if let Some(existing) = state.visible.get_mut(&key) {
            if !existing.is_known {
                existing.is_known = true;
                self.events.emit(ManagerEvent::DeviceUpdated(existing.clone()));
            }
        }
        if state.known.insert(key) {
            let mut known = device.clone();
            known.is_known = true;
            self.events.emit(ManagerEvent::KnownDeviceFound(known));
        }
    }

    /// Visible devices, strongest signal first
    pub async fn devices(&self) -> Vec<BluetoothDevice> {
        let state = self.state.lock().await;
        let mut devices: Vec<BluetoothDevice> = state.visible.values().cloned().collect();
        devices.sort_by(|a, b| {
            b.rssi
                .cmp(&a.rssi)
                .then_with(|| a.key(self.identity).cmp(&b.key(self.identity)))
        });
        devices
    }

    /// Looks a device up by its identity key among the visible devices and the slot occupant
    pub async fn find(&self, key: &str) -> Option<BluetoothDevice> {
        let state = self.state.lock().await;
        state.visible.get(key).cloned().or_else(|| {
            state
                .slot
                .device
                .as_ref()
                .filter(|d| d.key(self.identity) == key)
                .cloned()
        })
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.state.lock().await.visible.contains_key(key)
    }

    pub async fn set_bluetooth_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if state.bluetooth_enabled != enabled {
            state.bluetooth_enabled = enabled;
            info!("Bluetooth is now {}", if enabled { "on" } else { "off" });
            self.events.emit(ManagerEvent::BluetoothStateChanged { enabled });
        }
    }

    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.state.lock().await.bluetooth_enabled
    }

    /// Snapshot of the connection slot
    pub async fn connection(&self) -> ConnectionSlot {
        self.state.lock().await.slot.clone()
    }

    pub async fn occupant(&self) -> Option<BluetoothDevice> {
        self.state.lock().await.slot.device.clone()
    }

    /// Phase of `device` if it occupies the slot
    pub async fn phase_of(&self, device: &BluetoothDevice) -> Option<ConnectionPhase> {
        let state = self.state.lock().await;
        state
            .slot
            .device
            .as_ref()
            .filter(|d| d.key(self.identity) == device.key(self.identity))
            .map(|_| state.slot.phase)
    }

    /// Puts `device` into the empty slot in phase `Connecting`.
    /// Returns false when the slot is already taken.
    pub(crate) async fn occupy_slot(&self, device: &BluetoothDevice) -> bool {
        let mut state = self.state.lock().await;
        if state.slot.is_occupied() {
            return false;
        }
        state.slot.device = Some(device.clone());
        state.slot.phase = ConnectionPhase::Connecting;
        state.slot.values = DecodedValues::default();
        self.events.emit(ManagerEvent::ConnectionChanged(state.slot.clone()));
        true
    }

    /// Moves the occupant to `phase`; ignored if `device` is not the occupant
    pub(crate) async fn set_phase(&self, device: &BluetoothDevice, phase: ConnectionPhase) -> bool {
        let mut state = self.state.lock().await;
        let is_occupant = state
            .slot
            .device
            .as_ref()
            .is_some_and(|d| d.key(self.identity) == device.key(self.identity));
        if !is_occupant || state.slot.phase == phase {
            return false;
        }
        state.slot.phase = phase;
        if phase == ConnectionPhase::Connected {
            state.slot.last_error = None;
        }
        self.events.emit(ManagerEvent::ConnectionChanged(state.slot.clone()));
        true
    }

    /// Empties the slot if `device` occupies it
    pub(crate) async fn clear_slot(&self, device: &BluetoothDevice) -> bool {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state, device)
    }

    /// Empties the slot after a failed connect and reports the failure
    pub(crate) async fn record_failure(&self, device: &BluetoothDevice, reason: &str) {
        let mut state = self.state.lock().await;
        state.slot.last_error = Some(reason.to_string());
        if !self.clear_locked(&mut state, device) {
            // Slot already empty; the failure still needs to reach the user.
            self.events.emit(ManagerEvent::ConnectionChanged(state.slot.clone()));
        }
        self.events.emit(ManagerEvent::ConnectFailed {
            device: device.clone(),
            reason: reason.to_string(),
        });
    }

    /// Stores a decoded value for the connected occupant. Values for any
    /// other device, or arriving before/after `Connected`, are dropped.
    pub(crate) async fn record_value(&self, device_id: &str, value: DecodedValue) -> bool {
        let mut state = self.state.lock().await;
        let is_connected_occupant = state.slot.phase == ConnectionPhase::Connected
            && state.slot.device.as_ref().is_some_and(|d| d.id == device_id);
        if !is_connected_occupant || !state.slot.values.apply(&value) {
            return false;
        }
        self.events.emit(ManagerEvent::ValueDecoded {
            device_id: device_id.to_string(),
            value,
        });
        true
    }

    fn sighting_key_locked(&self, state: &RegistryState, device: &BluetoothDevice) -> String {
        if self.identity == IdentityPolicy::TrimmedName && !device.is_visible() {
            let slot_device = state.slot.device.as_ref().map(|d| (d.key(self.identity), d));
            let held = state
                .visible
                .iter()
                .map(|(key, d)| (key.clone(), d))
                .chain(slot_device)
                .find(|(_, d)| d.id == device.id);
            if let Some((key, _)) = held {
                return key;
            }
        }
        device.key(self.identity)
    }

    fn clear_locked(&self, state: &mut RegistryState, device: &BluetoothDevice) -> bool {
        let is_occupant = state
            .slot
            .device
            .as_ref()
            .is_some_and(|d| d.key(self.identity) == device.key(self.identity));
        if !is_occupant {
            return false;
        }
        state.slot.device = None;
        state.slot.phase = ConnectionPhase::Disconnected;
        state.slot.values = DecodedValues::default();
        self.events.emit(ManagerEvent::ConnectionChanged(state.slot.clone()));
        true
    }
}

/// Applies a new sighting to a visible entry; returns whether it changed.
/// A sighting without a name keeps the name seen earlier.
fn merge_sighting(existing: &mut BluetoothDevice, seen: &BluetoothDevice) -> bool {
    let mut changed = false;
    if existing.rssi != seen.rssi {
        existing.rssi = seen.rssi;
        changed = true;
    }
    if seen.is_visible() && existing.name != seen.name {
        existing.name = seen.name.clone();
        changed = true;
    }
    if seen.is_known && !existing.is_known {
        existing.is_known = true;
        changed = true;
    }
    changed
}
