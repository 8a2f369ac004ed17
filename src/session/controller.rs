use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::{GenerationOutcome, GenerationState, KeywordClassifier, LinkSession, LinkStatus, OutcomeClassifier, Result, SessionError};
use crate::serial::{ConnectionState, LinkEvent, ResponseRecord, SerialDeviceInfo, SerialLink};
use crate::topology::{self, PlacedComponent};

/// Drives a [`SerialLink`] the way the generator screen does: connection
/// status text, generation state and the list of received records.
///
/// Must be created inside a Tokio runtime; it spawns a task that follows the
/// link's events.
pub struct LinkController {
    link: Arc<SerialLink>,
    status_tx: Arc<watch::Sender<LinkStatus>>,
    // Records at or below this sequence predate the current attempt
    record_floor: Arc<AtomicU64>,
    observer: StdMutex<Option<JoinHandle<()>>>,
}

impl LinkController {
    pub fn new(link: Arc<SerialLink>) -> Self {
        Self::with_classifier(link, Arc::new(KeywordClassifier::default()))
    }

    pub fn with_classifier(link: Arc<SerialLink>, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::default());
        let status_tx = Arc::new(status_tx);
        let record_floor = Arc::new(AtomicU64::new(link.last_sequence()));

        let observer = tokio::spawn(observe_link(
            link.subscribe(),
            link.state_receiver(),
            status_tx.clone(),
            record_floor.clone(),
            classifier,
        ));

        Self {
            link,
            status_tx,
            record_floor,
            observer: StdMutex::new(Some(observer)),
        }
    }

    pub fn link(&self) -> &Arc<SerialLink> {
        &self.link
    }

    pub fn status(&self) -> LinkStatus {
        self.status_tx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    pub async fn connect(&self) -> Result<SerialDeviceInfo> {
        self.status_tx.send_modify(|s| {
            s.connection_text = "Connecting...".to_string();
            s.generation = GenerationState::Idle;
        });

        self.skip_pending_records();
        match self.link.connect().await {
            Ok(port) => {
                let session = LinkSession::open(port.clone());
                log::info!("Link session {} opened on {}", session.id, port.port_name);
                self.status_tx.send_modify(|s| {
                    s.connection = ConnectionState::Connected;
                    s.connection_text = format!("Connected to {}", port.port_name);
                    s.generation = GenerationState::Idle;
                    s.session = Some(session);
                });
                Ok(port)
            }
            Err(e) => {
                self.status_tx.send_modify(|s| {
                    s.connection = ConnectionState::Disconnected;
                    s.connection_text = "Connection failed".to_string();
                    s.generation = GenerationState::Error(e.to_string());
                    s.session = None;
                });
                Err(e.into())
            }
        }
    }

    pub async fn disconnect(&self) {
        self.link.disconnect().await;
        self.skip_pending_records();
        self.status_tx.send_modify(|s| {
            s.connection = ConnectionState::Disconnected;
            s.connection_text = "Disconnected".to_string();
            s.generation = GenerationState::Idle;
            s.session = None;
            s.received.clear();
        });
    }

    /// Start generating `structure` on the board. Completion is reported
    /// later through the generation state.
    pub async fn generate(&self, structure: &str) -> Result<()> {
        if structure.is_empty() {
            return Err(SessionError::EmptyStructure);
        }
        if !self.link.is_connected() {
            return Err(SessionError::NotConnected);
        }

        self.skip_pending_records();
        self.status_tx.send_modify(|s| {
            s.generation = GenerationState::Generating;
            s.received.clear();
        });

        if let Err(e) = self.link.send_structure(structure).await {
            log::error!("Error sending circuit structure: {}", e);
            self.status_tx.send_modify(|s| {
                s.generation = GenerationState::Error("Failed to send circuit structure".to_string());
            });
            return Err(e.into());
        }

        log::info!("Circuit structure {} sent", structure);
        Ok(())
    }

    /// Encode `components` and generate the resulting structure
    pub async fn generate_components(&self, components: &[PlacedComponent]) -> Result<String> {
        let structure = topology::encode(components);
        self.generate(&structure).await?;
        Ok(structure)
    }

    /// Tell the board to clear the current circuit
    pub async fn reset_chip(&self) -> Result<()> {
        if !self.link.is_connected() {
            return Err(SessionError::NotConnected);
        }

        self.skip_pending_records();
        self.status_tx.send_modify(|s| s.received.clear());

        match self.link.send_reset().await {
            Ok(()) => {
                self.status_tx.send_modify(|s| s.generation = GenerationState::Idle);
                log::info!("Reset signal sent");
                Ok(())
            }
            Err(e) => {
                self.status_tx.send_modify(|s| {
                    s.generation = GenerationState::Error("Failed to send reset signal".to_string());
                });
                Err(e.into())
            }
        }
    }

    fn skip_pending_records(&self) {
        self.record_floor.store(self.link.last_sequence(), Ordering::SeqCst);
    }

    /// Wait until the current attempt succeeds or fails
    pub async fn wait_for_outcome(&self) -> GenerationState {
        let mut status_rx = self.status_tx.subscribe();
        let generation = match status_rx.wait_for(|s| s.generation.is_finished()).await {
            Ok(status) => status.generation.clone(),
            // The sender lives as long as self
            Err(_) => self.status().generation,
        };
        generation
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            observer.abort();
        }
    }
}

async fn observe_link(
    mut events: broadcast::Receiver<LinkEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    status_tx: Arc<watch::Sender<LinkStatus>>,
    record_floor: Arc<AtomicU64>,
    classifier: Arc<dyn OutcomeClassifier>,
) {
    loop {
        match events.recv().await {
            Ok(LinkEvent::Record(record)) => {
                if record.sequence <= record_floor.load(Ordering::SeqCst) {
                    log::debug!("Ignoring record {} from before the current attempt", record.sequence);
                    continue;
                }
                let outcome = classifier.classify(&record);
                status_tx.send_modify(|s| apply_record(s, record, outcome));
            }
            // Events can trail the controller's own updates; the link's
            // current state is the one that counts
            Ok(LinkEvent::StateChanged(_)) => {
                let state = *state_rx.borrow();
                status_tx.send_modify(|s| apply_state(s, state));
            }
            Ok(LinkEvent::TransportFault(message)) => {
                status_tx.send_modify(|s| {
                    s.connection_text = format!("Error: {}", message);
                    s.generation = GenerationState::Error(message);
                });
            }
            Ok(LinkEvent::Connected(_)) | Ok(LinkEvent::ConnectionFailed(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Link observer lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn apply_record(status: &mut LinkStatus, record: ResponseRecord, outcome: Option<GenerationOutcome>) {
    // Late records from a closed session are not shown
    if status.connection != ConnectionState::Connected {
        return;
    }
    status.received.push(record);
    match outcome {
        Some(GenerationOutcome::Completed(message)) => status.generation = GenerationState::Success(message),
        Some(GenerationOutcome::Failed(message)) => status.generation = GenerationState::Error(message),
        None => {}
    }
}

fn apply_state(status: &mut LinkStatus, state: ConnectionState) {
    status.connection = state;
    if state == ConnectionState::Disconnected {
        status.received.clear();
    }
}
