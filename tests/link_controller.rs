mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{mock_link, read_frame, OpenOutcome, MockPortProvider};
use tokio::io::{AsyncWriteExt, DuplexStream};
use wireless_link_lib::serial::{ConnectionState, ResponseStatus};
use wireless_link_lib::session::{GenerationOutcome, GenerationState, LinkController, LinkStatus, SessionError};
use wireless_link_lib::topology::{Mode, PlacedComponent};

async fn connected_controller() -> (LinkController, Arc<MockPortProvider>, DuplexStream) {
    let (link, provider) = mock_link(&[]);
    let controller = LinkController::new(link);
    controller.connect().await.expect("connect");
    let device = provider.take_device();
    (controller, provider, device)
}

async fn wait_status(controller: &LinkController, f: impl FnMut(&LinkStatus) -> bool) -> LinkStatus {
    let mut status_rx = controller.status_receiver();
    let status = tokio::time::timeout(Duration::from_secs(2), status_rx.wait_for(f))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
    status.clone()
}

#[tokio::test]
async fn test_initial_status() {
    let (link, _provider) = mock_link(&[]);
    let controller = LinkController::new(link);
    let status = controller.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.connection_text, "Disconnected");
    assert_eq!(status.generation, GenerationState::Idle);
    assert!(status.session.is_none());
}

#[tokio::test]
async fn test_connect_opens_session() {
    let (controller, _provider, _device) = connected_controller().await;
    let status = controller.status();
    assert_eq!(status.connection, ConnectionState::Connected);
    assert_eq!(status.connection_text, "Connected to /dev/ttyMOCK0");
    assert_eq!(status.session.map(|s| s.port.port_name), Some("/dev/ttyMOCK0".to_string()));
}

#[tokio::test]
async fn test_failed_connect_sets_error() {
    let (link, _provider) = mock_link(&[OpenOutcome::Fail]);
    let controller = LinkController::new(link);

    assert!(matches!(controller.connect().await, Err(SessionError::Connection(_))));
    let status = controller.status();
    assert_eq!(status.connection_text, "Connection failed");
    assert!(matches!(status.generation, GenerationState::Error(_)));
}

#[tokio::test]
async fn test_generate_requires_structure_and_connection() {
    let (link, _provider) = mock_link(&[]);
    let controller = LinkController::new(link);

    assert!(matches!(controller.generate("").await, Err(SessionError::EmptyStructure)));
    assert!(matches!(controller.generate("S2").await, Err(SessionError::NotConnected)));
    assert_eq!(controller.status().generation, GenerationState::Idle);
}

#[tokio::test]
async fn test_generate_completes_on_circuit_message() {
    let (controller, _provider, mut device) = connected_controller().await;

    controller.generate("S2P5").await.expect("generate");
    assert_eq!(controller.status().generation, GenerationState::Generating);
    assert_eq!(read_frame(&mut device, 8).await, b"S2P5nnnn");

    device
        .write_all(b"placing IC 1\n{\"status\":\"success\",\"message\":\"circuit generated\"}\n")
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), controller.wait_for_outcome())
        .await
        .expect("timed out");
    assert_eq!(outcome, GenerationState::Success("circuit generated".to_string()));

    let status = controller.status();
    assert_eq!(status.received.len(), 2);
    assert_eq!(status.received[0].status, ResponseStatus::Data);
}

#[tokio::test]
async fn test_generate_fails_on_error_record() {
    let (controller, _provider, mut device) = connected_controller().await;

    controller.generate("P3").await.expect("generate");
    device
        .write_all(b"{\"status\":\"error\",\"message\":\"not enough sockets\"}\n")
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), controller.wait_for_outcome())
        .await
        .expect("timed out");
    assert_eq!(outcome, GenerationState::Error("not enough sockets".to_string()));
}

#[tokio::test]
async fn test_unrelated_success_keeps_generating() {
    let (controller, _provider, mut device) = connected_controller().await;

    controller.generate("S1").await.expect("generate");
    device
        .write_all(b"{\"status\":\"success\",\"message\":\"power ok\"}\n")
        .await
        .unwrap();

    let status = wait_status(&controller, |s| s.received.len() == 1).await;
    assert_eq!(status.generation, GenerationState::Generating);
}

#[tokio::test]
async fn test_custom_classifier() {
    let (link, provider) = mock_link(&[]);
    let controller = LinkController::with_classifier(
        link,
        Arc::new(|record: &wireless_link_lib::serial::ResponseRecord| {
            (record.payload == Some(serde_json::json!("DONE"))).then(|| GenerationOutcome::Completed("done".into()))
        }),
    );
    controller.connect().await.expect("connect");
    let mut device = provider.take_device();

    controller.generate("S1").await.expect("generate");
    device.write_all(b"DONE\n").await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), controller.wait_for_outcome())
        .await
        .expect("timed out");
    assert_eq!(outcome, GenerationState::Success("done".to_string()));
}

#[tokio::test]
async fn test_generate_components_encodes_structure() {
    let (controller, _provider, mut device) = connected_controller().await;
    let components = vec![
        PlacedComponent::new("resistor", "1k", Mode::Series),
        PlacedComponent::new("resistor", "2k", Mode::Parallel),
        PlacedComponent::new("capacitor", "10u", Mode::Parallel),
    ];

    let structure = controller.generate_components(&components).await.expect("generate");
    assert_eq!(structure, "S1P2");
    assert_eq!(read_frame(&mut device, 8).await, b"S1P2nnnn");
}

#[tokio::test]
async fn test_reset_chip() {
    let (controller, _provider, mut device) = connected_controller().await;

    controller.generate("S1").await.expect("generate");
    read_frame(&mut device, 8).await;

    controller.reset_chip().await.expect("reset");
    assert_eq!(read_frame(&mut device, 17).await, vec![b'R'; 17]);

    let status = controller.status();
    assert_eq!(status.generation, GenerationState::Idle);
    assert!(status.received.is_empty());
}

#[tokio::test]
async fn test_reset_requires_connection() {
    let (link, _provider) = mock_link(&[]);
    let controller = LinkController::new(link);
    assert!(matches!(controller.reset_chip().await, Err(SessionError::NotConnected)));
}

#[tokio::test]
async fn test_disconnect_clears_received() {
    let (controller, _provider, mut device) = connected_controller().await;

    device.write_all(b"hello\n").await.unwrap();
    wait_status(&controller, |s| s.received.len() == 1).await;

    controller.disconnect().await;
    let status = controller.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.connection_text, "Disconnected");
    assert!(status.received.is_empty());
    assert!(status.session.is_none());
}

#[tokio::test]
async fn test_device_hangup_fails_generation() {
    let (controller, _provider, device) = connected_controller().await;

    controller.generate("S2").await.expect("generate");
    drop(device);

    let status = wait_status(&controller, |s| s.generation.is_finished()).await;
    assert_eq!(status.generation, GenerationState::Error("Stream closed by device".to_string()));
    assert_eq!(status.connection_text, "Error: Stream closed by device");
}

#[tokio::test]
async fn test_connect_status_survives_queued_link_events() {
    let (controller, _provider, _device) = connected_controller().await;

    // Let the observer work through Connecting/Connected events queued during connect
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let status = controller.status();
    assert_eq!(status.connection, ConnectionState::Connected);
    assert_eq!(status.connection_text, "Connected to /dev/ttyMOCK0");
}

#[tokio::test]
async fn test_records_from_before_generate_are_not_classified() {
    let (controller, _provider, mut device) = connected_controller().await;
    let mut events = controller.link().subscribe();

    device
        .write_all(b"{\"status\":\"success\",\"message\":\"circuit generated\"}\n")
        .await
        .unwrap();
    // Wait on the link, not the controller, so the record may still be queued for the observer
    common::next_record(&mut events).await;

    controller.generate("S1").await.expect("generate");
    device.write_all(b"placing IC 1\n").await.unwrap();

    let status = wait_status(&controller, |s| s.received.len() == 1).await;
    assert_eq!(status.generation, GenerationState::Generating);
    assert_eq!(status.received[0].payload, Some(serde_json::json!("placing IC 1")));
}
