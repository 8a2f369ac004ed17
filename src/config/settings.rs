use std::path::Path;

use serde::{Deserialize, Serialize};

/// Link settings. Serial line parameters are fixed by the firmware and live
/// in [`SerialSettings`](crate::serial::SerialSettings) instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkConfig {
    /// Port to use instead of auto-selecting one
    pub port_name: Option<String>,
    /// Total connect attempts when the port is held open elsewhere
    pub connect_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Buffered events per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            connect_attempts: 2,
            retry_backoff_ms: 300,
            event_capacity: 256,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl LinkConfig {
    /// Load settings from a JSON file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}
