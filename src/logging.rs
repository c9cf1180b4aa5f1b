//! Logger setup
//! Console logging through `env_logger`, driven by [`LogConfig`] with
//! `RUST_LOG` taking precedence.

use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::SetLoggerError;

use crate::config::log_config::LogConfig;

/// Installs the global logger. Fails if a logger is already installed.
pub fn init(config: &LogConfig) -> Result<(), SetLoggerError> {
    let show_target = config.show_target;
    Builder::from_env(Env::default().default_filter_or(config.level.as_str()))
        .format(move |buf, record| {
            let timestamp = Local::now().to_rfc3339();
            if show_target {
                writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(buf, "{} [{}] {}", timestamp, record.level(), record.args())
            }
        })
        .try_init()
}
