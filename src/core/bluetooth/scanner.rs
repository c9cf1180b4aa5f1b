//! Scan scheduler
//!
//! Drives the endless discovery loop `Idle -> Scanning -> Reconciling -> Idle`.
//! Sightings are collected into a per-cycle observation set and only handed
//! to the [`DeviceRegistry`] after the stack acknowledged the scan stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::device::BluetoothDevice;
use crate::core::bluetooth::events::{EventBus, ManagerEvent};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::Advertisement;

/// One bounded discovery window and what was seen during it
#[derive(Debug, Clone)]
pub struct ScanCycle {
    pub number: u64,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    observed: HashMap<String, BluetoothDevice>,
}

impl ScanCycle {
    pub fn new(number: u64, duration: Duration) -> Self {
        Self {
            number,
            started_at: Local::now(),
            duration,
            observed: HashMap::new(),
        }
    }

    /// Records a sighting in arrival order: the latest signal strength wins,
    /// a sighting without a name keeps the name seen earlier in the cycle.
    pub fn observe(&mut self, key: String, mut device: BluetoothDevice) {
        if let Some(previous) = self.observed.get(&key) {
            if !device.is_visible() {
                device.name = previous.name.clone();
            }
            device.is_known |= previous.is_known;
        }
        self.observed.insert(key, device);
    }

    /// Forgets everything observed; the cycle then counts as empty
    pub fn discard(&mut self) {
        self.observed.clear();
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&BluetoothDevice> {
        self.observed.get(key)
    }

    pub fn into_devices(self) -> impl Iterator<Item = BluetoothDevice> {
        self.observed.into_values()
    }
}

enum CycleEnd {
    Completed(ScanCycle),
    RadioOff,
    Cancelled,
}

/// Everything the background loop needs, cloned into the task
#[derive(Clone)]
struct ScanLoop {
    adapter: Arc<dyn BluetoothAdapter>,
    registry: DeviceRegistry,
    events: EventBus,
    config: BluetoothConfig,
}

pub struct ScanScheduler {
    scan_loop: ScanLoop,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl ScanScheduler {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        registry: DeviceRegistry,
        events: EventBus,
        config: BluetoothConfig,
    ) -> Self {
        Self {
            scan_loop: ScanLoop {
                adapter,
                registry,
                events,
                config,
            },
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the scan loop. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            info!("Scan loop already running.");
            return;
        }

        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let scan_loop = self.scan_loop.clone();

        let handle = tokio::spawn(async move {
            scan_loop.run(cancel_token_for_task).await;
        });
        self.scan_task_handle = Some(handle);
        info!("Device scan loop started.");
    }

    /// Cancels the loop and waits for it to wind down
    pub async fn stop(&mut self) {
        info!("Stopping Bluetooth scan loop.");
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            info!("Waiting for scan task to finish...");
            match handle.await {
                Ok(()) => info!("Scan task finished after cancellation."),
                Err(e) if e.is_cancelled() => info!("Scan task was cancelled."),
                Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
            }
        } else {
            info!("No active scan task handle found to wait for.");
        }
    }
}

impl ScanLoop {
    async fn run(self, cancel_token: CancellationToken) {
        let mut cycle_number: u64 = 0;

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let enabled = self.adapter.is_enabled().await;
            self.registry.set_bluetooth_enabled(enabled).await;
            if !enabled {
                debug!("Bluetooth is off, re-checking in {:?}", self.config.disabled_backoff());
                if !pause(self.config.disabled_backoff(), &cancel_token).await {
                    break;
                }
                continue;
            }

            cycle_number += 1;
            match self.scan_cycle(cycle_number, &cancel_token).await {
                CycleEnd::Completed(cycle) => {
                    let observed = cycle.len();
                    self.registry.reconcile(cycle.into_devices()).await;
                    self.events.emit(ManagerEvent::ScanCompleted {
                        cycle: cycle_number,
                        observed,
                    });
                }
                CycleEnd::RadioOff => continue,
                CycleEnd::Cancelled => break,
            }

            if !pause(self.config.idle_pause(), &cancel_token).await {
                break;
            }
        }

        info!("Scan loop ended.");
    }

    async fn scan_cycle(&self, number: u64, cancel_token: &CancellationToken) -> CycleEnd {
        let mut cycle = ScanCycle::new(number, self.config.scan_duration());

        if self.config.include_known_devices {
            self.collect_known_devices(&mut cycle).await;
        }

        let (sink, mut sightings) = mpsc::unbounded_channel();
        if let Err(e) = self.adapter.start_scan(sink).await {
            warn!("Failed to start scan cycle {}: {}. Treating it as empty.", number, e);
            cycle.discard();
            return CycleEnd::Completed(cycle);
        }
        self.events.emit(ManagerEvent::ScanStarted { cycle: number });
        info!("Scan cycle {} started at {}", number, cycle.started_at.to_rfc3339());

        let window = tokio::time::sleep(cycle.duration);
        tokio::pin!(window);
        let mut radio_check = tokio::time::interval(self.config.disabled_backoff());
        radio_check.tick().await;
        let mut stream_open = true;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    self.stop_scan(number).await;
                    return CycleEnd::Cancelled;
                }
                _ = &mut window => break,
                _ = radio_check.tick() => {
                    if !self.adapter.is_enabled().await {
                        info!("Bluetooth turned off during scan cycle {}, aborting it.", number);
                        self.registry.set_bluetooth_enabled(false).await;
                        self.stop_scan(number).await;
                        return CycleEnd::RadioOff;
                    }
                }
                sighting = sightings.recv(), if stream_open => match sighting {
                    Some(advertisement) => self.observe(&mut cycle, advertisement).await,
                    None => {
                        debug!("Scan stream of cycle {} ended before the window closed.", number);
                        stream_open = false;
                    }
                },
            }
        }

        if !self.stop_scan(number).await {
            cycle.discard();
            return CycleEnd::Completed(cycle);
        }

        // Sightings queued before the stop was acknowledged still belong to this cycle.
        while let Ok(advertisement) = sightings.try_recv() {
            self.observe(&mut cycle, advertisement).await;
        }

        debug!("Scan cycle {} observed {} device(s)", number, cycle.len());
        CycleEnd::Completed(cycle)
    }

    async fn collect_known_devices(&self, cycle: &mut ScanCycle) {
        match self.adapter.known_devices().await {
            Ok(known) => {
                for advertisement in known {
                    let mut device = advertisement.into_device();
                    device.is_known = true;
                    self.registry.record_known(&device).await;
                    let key = self.registry.key_for_sighting(&device).await;
                    cycle.observe(key, device);
                }
            }
            Err(e) => warn!("Failed to list known devices: {}", e),
        }
    }

    async fn observe(&self, cycle: &mut ScanCycle, advertisement: Advertisement) {
        if let Some(min_rssi) = self.config.min_rssi {
            if advertisement.rssi < min_rssi {
                return;
            }
        }
        debug!(
            "Found device - ID: {}, Name: {:?}, RSSI: {}",
            advertisement.id, advertisement.name, advertisement.rssi
        );

        let device = advertisement.into_device();
        let key = self.registry.key_for_sighting(&device).await;
        self.registry.upsert_signal(&key, device.rssi).await;
        cycle.observe(key, device);
    }

    /// Returns false when the stack rejected the stop
    async fn stop_scan(&self, number: u64) -> bool {
        match self.adapter.stop_scan().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to stop scan cycle {}: {}. Treating it as empty.", number, e);
                false
            }
        }
    }
}

/// Sleeps for `duration`; returns false if cancelled first
async fn pause(duration: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel_token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
