//! Records and events produced by the serial link
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SerialDeviceInfo;

/// Lifecycle of the physical link
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Data,
}

/// One decoded line from the firmware
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRecord {
    pub status: ResponseStatus,
    pub payload: Option<serde_json::Value>,
    pub message: Option<String>,
    /// Host capture time
    pub timestamp: DateTime<Utc>,
    /// Position in the link's record stream, starting at 1. Zero until dispatched.
    #[serde(default)]
    pub sequence: u64,
}

impl ResponseRecord {
    /// Record for a line that was not a structured response
    pub fn raw(line: &str) -> Self {
        Self {
            status: ResponseStatus::Data,
            payload: Some(serde_json::Value::String(line.trim().to_string())),
            message: None,
            timestamp: Utc::now(),
            sequence: 0,
        }
    }
}

/// Events fanned out to every subscriber of a link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    Connected(SerialDeviceInfo),
    Record(ResponseRecord),
    ConnectionFailed(String),
    TransportFault(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub lines_read: u64,
    pub demoted_lines: u64,
    pub utf8_decode_errors: u64,
    pub partial_buffer_trims: u64,
    pub connect_attempts: u64,
    pub last_error: Option<String>,
}
