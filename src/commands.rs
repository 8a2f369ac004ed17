//! Entry points for the UI. Errors are flattened to display strings.
use std::sync::Arc;

use crate::serial::{self, SerialDeviceInfo};
use crate::session::{LinkController, LinkStatus};
use crate::topology::{self, IcPlacement, PlacedComponent, RemainderPolicy};

/// List serial ports the controller could be attached to
pub async fn list_serial_ports() -> Result<Vec<SerialDeviceInfo>, String> {
    serial::list_ports().map_err(|e| format!("Failed to list serial ports: {}", e))
}

/// Connect to the breadboard controller
pub async fn connect_link(controller: &Arc<LinkController>) -> Result<SerialDeviceInfo, String> {
    controller
        .connect()
        .await
        .map_err(|e| format!("Failed to connect to controller: {}", e))
}

/// Disconnect from the breadboard controller
pub async fn disconnect_link(controller: &Arc<LinkController>) -> Result<(), String> {
    controller.disconnect().await;
    Ok(())
}

/// Current connection and generation status
pub async fn get_link_status(controller: &Arc<LinkController>) -> Result<LinkStatus, String> {
    Ok(controller.status())
}

/// Encode the placed components and send the structure to the board
pub async fn generate_circuit(
    components: Vec<PlacedComponent>,
    controller: &Arc<LinkController>,
) -> Result<String, String> {
    controller
        .generate_components(&components)
        .await
        .map_err(|e| format!("Failed to generate circuit: {}", e))
}

/// Clear the circuit on the board
pub async fn reset_circuit(controller: &Arc<LinkController>) -> Result<(), String> {
    controller
        .reset_chip()
        .await
        .map_err(|e| format!("Failed to reset circuit: {}", e))
}

/// Send a JSON command such as `GET_SYSTEM_STATUS`
pub async fn send_firmware_command(
    command: String,
    parameters: Option<serde_json::Value>,
    controller: &Arc<LinkController>,
) -> Result<(), String> {
    controller
        .link()
        .send_command(&command, parameters)
        .await
        .map_err(|e| format!("Failed to send {}: {}", command, e))
}

pub fn encode_structure(components: Vec<PlacedComponent>) -> String {
    topology::encode(&components)
}

/// Socket placements for the placement guide
pub fn plan_ic_placements(
    structure: String,
    components: Vec<PlacedComponent>,
    single_remainder_as_series: bool,
) -> Vec<IcPlacement> {
    let policy = if single_remainder_as_series {
        RemainderPolicy::SingleAsSeries
    } else {
        RemainderPolicy::KeepParallel
    };
    topology::plan_placements_with(&structure, &components, policy)
}
