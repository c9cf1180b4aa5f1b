use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    DEFAULT_BATTERY_POLL_INTERVAL_MS, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_RETRY_DELAY_MS,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DISABLED_BACKOFF_MS, DEFAULT_EVENT_CAPACITY,
    DEFAULT_IDLE_PAUSE_MS, DEFAULT_SCAN_DURATION_MS, IdentityPolicy,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Length of one discovery window.
    pub scan_duration_ms: u64,

    /// Pause between the end of a cycle and the next scan start.
    pub idle_pause_ms: u64,

    /// How often the radio state is re-checked while it is off. Also the
    /// sampling period of the radio state during a running scan.
    pub disabled_backoff_ms: u64,

    /// Battery level re-read period while connected.
    pub battery_poll_interval_ms: u64,

    /// Upper bound for one connect attempt. `None` waits for the stack
    /// however long it takes.
    pub connect_timeout_ms: Option<u64>,

    /// Attempts per connect request (1 = no retry).
    pub connect_attempts: u32,

    pub connect_retry_delay_ms: u64,

    /// Sightings weaker than this (dBm) are ignored.
    pub min_rssi: Option<i16>,

    /// Device de-duplication key.
    pub identity: IdentityPolicy,

    /// Feed paired/system-connected devices into every cycle.
    pub include_known_devices: bool,

    pub event_capacity: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        BluetoothConfig {
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
            idle_pause_ms: DEFAULT_IDLE_PAUSE_MS,
            disabled_backoff_ms: DEFAULT_DISABLED_BACKOFF_MS,
            battery_poll_interval_ms: DEFAULT_BATTERY_POLL_INTERVAL_MS,
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
            min_rssi: None,
            identity: IdentityPolicy::Address,
            include_known_devices: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BluetoothConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }

    pub fn disabled_backoff(&self) -> Duration {
        // A zero backoff would turn the disabled wait into a busy loop.
        Duration::from_millis(self.disabled_backoff_ms.max(1))
    }

    pub fn battery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.battery_poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}
