use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serial::{ConnectionState, ResponseRecord, SerialDeviceInfo};

/// Progress of the current circuit generation attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum GenerationState {
    Idle,
    Generating,
    Success(String),
    Error(String),
}

impl GenerationState {
    pub fn is_finished(&self) -> bool {
        matches!(self, GenerationState::Success(_) | GenerationState::Error(_))
    }
}

/// One connected period with the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSession {
    pub id: Uuid,
    pub port: SerialDeviceInfo,
    pub connected_at: DateTime<Utc>,
}

impl LinkSession {
    pub fn open(port: SerialDeviceInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            port,
            connected_at: Utc::now(),
        }
    }
}

/// Everything the UI shows about the link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkStatus {
    pub connection: ConnectionState,
    pub connection_text: String,
    pub generation: GenerationState,
    pub session: Option<LinkSession>,
    pub received: Vec<ResponseRecord>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            connection_text: "Disconnected".to_string(),
            generation: GenerationState::Idle,
            session: None,
            received: Vec::new(),
        }
    }
}
