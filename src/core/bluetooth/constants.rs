//! Constants used throughout the Bluetooth module
//! This module contains the well-known GATT UUIDs the protocol walker decodes
//! and the default timings of the scan and connection loops.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const UUID_SERIAL_NUMBER: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);

/// Length of one discovery window in milliseconds
pub const DEFAULT_SCAN_DURATION_MS: u64 = 10_000;

/// Pause between two scan cycles in milliseconds
pub const DEFAULT_IDLE_PAUSE_MS: u64 = 1_000;

/// Re-check interval while the radio is off, in milliseconds
pub const DEFAULT_DISABLED_BACKOFF_MS: u64 = 1_000;

/// Battery level re-read interval in milliseconds
pub const DEFAULT_BATTERY_POLL_INTERVAL_MS: u64 = 5_000;

/// Timeout for a single connect attempt in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Number of connect attempts before a request is reported as failed
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 1;

/// Delay between connection retries in milliseconds
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 1_000;

/// Capacity of the manager event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Highest valid battery percentage
pub const MAX_BATTERY_LEVEL: u8 = 100;
