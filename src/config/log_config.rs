use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// env_logger filter directives, e.g. `info` or `ble_device_manager_lib=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Include the module path of the log call in each line.
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            show_target: false,
        }
    }
}
