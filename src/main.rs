use std::sync::Arc;

use anyhow::{Context, Result};
use ble_device_manager_lib::commands::{self, ConsoleCommand};
use ble_device_manager_lib::config::AppConfig;
use ble_device_manager_lib::core::bluetooth::BluestAdapter;
use ble_device_manager_lib::state::AppState;
use ble_device_manager_lib::{logging, ManagerEvent};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_default().await.unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {:#}", e);
        AppConfig::default()
    });

    if logging::init(&config.logging).is_err() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let adapter = BluestAdapter::new()
        .await
        .context("Failed to open the Bluetooth adapter")?;
    let app_state = AppState::new(Arc::new(adapter), config).await;

    let mut events = app_state.bluetooth_manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Commands: list | status | select <device> | disconnect | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => run_command(&app_state, command).await,
            Err(e) => warn!("{}", e),
        }
    }

    app_state.shutdown().await;
    info!("Bye.");
    Ok(())
}

async fn run_command(app_state: &AppState, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Select(key) => match commands::select_device(app_state, &key).await {
            Ok(outcome) => info!("{}: {:?}", key, outcome),
            Err(e) => error!("{}: {}", key, e),
        },
        ConsoleCommand::Disconnect => {
            if let Err(e) = commands::disconnect(app_state).await {
                warn!("{}", e);
            }
        }
        ConsoleCommand::List => {
            if let Ok(devices) = commands::list_devices(app_state).await {
                for device in devices {
                    info!(
                        "{:>5} dBm  {:<24} {}{}",
                        device.rssi,
                        device.display_name().unwrap_or("-"),
                        device.address.as_deref().unwrap_or(&device.id),
                        if device.is_known { "  (known)" } else { "" }
                    );
                }
            }
        }
        ConsoleCommand::Status => {
            let enabled = commands::bluetooth_enabled(app_state).await.unwrap_or(false);
            if let Ok(slot) = commands::connection_status(app_state).await {
                match serde_json::to_string(&slot) {
                    Ok(json) => info!("bluetooth enabled: {}, connection: {}", enabled, json),
                    Err(e) => error!("Failed to serialize connection state: {}", e),
                }
            }
        }
        ConsoleCommand::Quit => {}
    }
}

fn log_event(event: &ManagerEvent) {
    match event {
        ManagerEvent::ConnectFailed { device, reason } => {
            error!("Could not connect to {}: {}", device.display_name().unwrap_or(&device.id), reason)
        }
        other => match serde_json::to_string(other) {
            Ok(json) => info!("event {}", json),
            Err(e) => error!("Failed to serialize event: {}", e),
        },
    }
}
