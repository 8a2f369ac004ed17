pub mod interface;
pub mod link;
pub mod protocol;
pub mod reader;
pub mod types;

pub use interface::{list_ports, PortProvider, PortStreams, SystemPortProvider};
pub use link::SerialLink;
pub use protocol::FirmwareCommand;
pub use types::{ConnectionState, LinkEvent, LinkMetrics, ResponseRecord, ResponseStatus};

use serde::{Deserialize, Serialize};

// STMicroelectronics ST-LINK virtual COM port on Nucleo boards
pub const STLINK_VID: u16 = 0x0483;

/// Serial port as reported by the operating system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub is_stlink: bool,
}

impl SerialDeviceInfo {
    pub fn named(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
            is_stlink: false,
        }
    }
}

/// Line settings expected by the firmware. Not negotiable per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: bool,
    pub flow_control: bool,
    pub buffer_size: usize,
}

impl SerialSettings {
    pub const FIRMWARE: SerialSettings = SerialSettings {
        baud_rate: 115200,
        data_bits: 8,
        stop_bits: 1,
        parity: false,
        flow_control: false,
        buffer_size: 1024,
    };
}

/// Failures reported by a [`PortProvider`]
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("No port selected")]
    NoPortSelected,

    #[error("Port not found: {0}")]
    NotFound(String),

    #[error("Port is already open: {0}")]
    AlreadyOpen(String),

    #[error("Failed to open port: {0}")]
    Open(String),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("Port still in use after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

impl From<PortError> for ConnectionError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NoPortSelected | PortError::NotFound(_) => {
                ConnectionError::PortUnavailable(err.to_string())
            }
            other => ConnectionError::OpenFailed(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("Not connected")]
    NotConnected,

    #[error("Write failed: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Command encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of an outbound operation; other layers name their error explicitly
pub type Result<T, E = TransmitError> = std::result::Result<T, E>;

/// Mid-session fault raised by the background read loop
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Stream closed by device")]
    StreamClosed,
}
