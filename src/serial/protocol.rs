use serde::Serialize;

/// Structure frames shorter than this are padded with [`STRUCTURE_FILLER`]
pub const STRUCTURE_FRAME_MIN_LEN: usize = 8;
pub const STRUCTURE_FILLER: char = 'n';

/// Tells the firmware to clear the current circuit
pub const RESET_SENTINEL: &str = "RRRRRRRRRRRRRRRRR";

/// Trailing byte after the newline of every JSON command
pub const COMMAND_SENTINEL: u8 = b'X';

/// JSON commands understood by the breadboard firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareCommand {
    CircuitData,
    GenerateCircuit,
    SetPowerSource,
    GetSystemStatus,
    ResetSystem,
}

impl FirmwareCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirmwareCommand::CircuitData => "CIRCUIT_DATA",
            FirmwareCommand::GenerateCircuit => "GENERATE_CIRCUIT",
            FirmwareCommand::SetPowerSource => "SET_POWER_SOURCE",
            FirmwareCommand::GetSystemStatus => "GET_SYSTEM_STATUS",
            FirmwareCommand::ResetSystem => "RESET_SYSTEM",
        }
    }
}

#[derive(Serialize)]
struct CommandEnvelope<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a serde_json::Value>,
    timestamp: i64,
}

/// Raw structure frame: the structure string right-padded to the minimum frame length
pub fn structure_frame(structure: &str) -> Vec<u8> {
    let mut frame = structure.to_string();
    while frame.len() < STRUCTURE_FRAME_MIN_LEN {
        frame.push(STRUCTURE_FILLER);
    }
    frame.into_bytes()
}

pub fn reset_frame() -> Vec<u8> {
    RESET_SENTINEL.as_bytes().to_vec()
}

/// JSON command frame: one JSON line followed by the command sentinel
pub fn command_frame(
    name: &str,
    parameters: Option<&serde_json::Value>,
    timestamp_ms: i64,
) -> Result<Vec<u8>, serde_json::Error> {
    let envelope = CommandEnvelope {
        command: name,
        parameters,
        timestamp: timestamp_ms,
    };
    let mut frame = serde_json::to_vec(&envelope)?;
    frame.push(b'\n');
    frame.push(COMMAND_SENTINEL);
    Ok(frame)
}
