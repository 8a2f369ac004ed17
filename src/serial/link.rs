use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use super::interface::{BoxedWriter, PortProvider};
use super::protocol::{self, FirmwareCommand};
use super::reader::reader_task;
use super::types::{ConnectionState, LinkEvent, LinkMetrics, ResponseRecord};
use super::{ConnectionError, PortError, Result, SerialDeviceInfo, SerialSettings, TransmitError, TransportError};
use crate::config::LinkConfig;
use crate::topology::PlacedComponent;

pub type DataCallback = Arc<dyn Fn(&ResponseRecord) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// State shared between the link and its read loop
pub(crate) struct LinkShared {
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<LinkEvent>,
    metrics_tx: watch::Sender<LinkMetrics>,
    records: StdMutex<Vec<ResponseRecord>>,
    last_sequence: AtomicU64,
    on_data: StdRwLock<Option<DataCallback>>,
    on_error: StdRwLock<Option<ErrorCallback>>,
}

impl LinkShared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            let _ = self.events_tx.send(LinkEvent::StateChanged(state));
        }
    }

    pub(crate) fn update_metrics(&self, f: impl FnOnce(&mut LinkMetrics)) {
        self.metrics_tx.send_modify(f);
    }

    /// Log the record, hand it to the data callback, then to subscribers
    pub(crate) fn dispatch_record(&self, mut record: ResponseRecord) {
        record.sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());

        let callback = self.on_data.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(callback) = callback {
            callback(&record);
        }

        let _ = self.events_tx.send(LinkEvent::Record(record));
    }

    fn notify_error(&self, message: &str) {
        let callback = self.on_error.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    pub(crate) fn report_fault(&self, err: TransportError) {
        let message = err.to_string();
        log::error!("Serial transport error: {}", message);
        self.update_metrics(|m| m.last_error = Some(message.clone()));
        self.notify_error(&message);
        let _ = self.events_tx.send(LinkEvent::TransportFault(message));
    }

    fn report_connection_failure(&self, err: &ConnectionError) {
        let message = format!("Connection failed: {}", err);
        log::error!("{}", message);
        self.update_metrics(|m| m.last_error = Some(message.clone()));
        self.notify_error(&message);
        let _ = self.events_tx.send(LinkEvent::ConnectionFailed(message));
    }
}

/// Owns the serial connection to the breadboard controller.
///
/// All commands are fire-and-forget: replies arrive asynchronously through
/// the data callback, the record log and [`LinkEvent`] subscribers.
pub struct SerialLink {
    provider: Arc<dyn PortProvider>,
    config: LinkConfig,
    shared: Arc<LinkShared>,
    port: Mutex<Option<SerialDeviceInfo>>,
    writer: Mutex<Option<BoxedWriter>>,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

impl SerialLink {
    pub fn new(provider: Arc<dyn PortProvider>, config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (metrics_tx, _) = watch::channel(LinkMetrics::default());

        Self {
            provider,
            config,
            shared: Arc::new(LinkShared {
                state_tx,
                events_tx,
                metrics_tx,
                records: StdMutex::new(Vec::new()),
                last_sequence: AtomicU64::new(0),
                on_data: StdRwLock::new(None),
                on_error: StdRwLock::new(None),
            }),
            port: Mutex::new(None),
            writer: Mutex::new(None),
            read_task: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn settings(&self) -> SerialSettings {
        SerialSettings::FIRMWARE
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn metrics_receiver(&self) -> watch::Receiver<LinkMetrics> {
        self.shared.metrics_tx.subscribe()
    }

    pub fn metrics(&self) -> LinkMetrics {
        self.shared.metrics_tx.borrow().clone()
    }

    /// Subscribe to link events. Every subscriber sees every event.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Register the data callback, replacing any previous one
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn(&ResponseRecord) + Send + Sync + 'static,
    {
        *self.shared.on_data.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Register the error callback, replacing any previous one
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.on_error.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Records received during the current session
    pub fn records(&self) -> Vec<ResponseRecord> {
        self.shared
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence number of the newest dispatched record, 0 if none yet
    pub fn last_sequence(&self) -> u64 {
        self.shared.last_sequence.load(Ordering::SeqCst)
    }

    pub async fn port_info(&self) -> Option<SerialDeviceInfo> {
        self.port.lock().await.clone()
    }

    /// Open a connection to the controller, replacing any live one.
    ///
    /// A port held open elsewhere is retried after a fixed backoff, up to
    /// `connect_attempts` attempts in total.
    pub async fn connect(&self) -> Result<SerialDeviceInfo, ConnectionError> {
        if self.state() == ConnectionState::Connected {
            self.disconnect().await;
        }

        self.shared.set_state(ConnectionState::Connecting);

        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        let result = loop {
            self.shared.update_metrics(|m| m.connect_attempts += 1);

            match self.open_once().await {
                Ok(port) => break Ok(port),
                Err(PortError::AlreadyOpen(reason)) if attempt < attempts => {
                    log::warn!(
                        "Port already open ({}), retrying in {}ms (attempt {}/{})",
                        reason,
                        self.config.retry_backoff_ms,
                        attempt,
                        attempts
                    );
                    self.provider.release_all_grants().await;
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                    attempt += 1;
                }
                Err(PortError::AlreadyOpen(reason)) => {
                    break Err(ConnectionError::RetriesExhausted { attempts, reason });
                }
                Err(e) => break Err(ConnectionError::from(e)),
            }
        };

        match result {
            Ok(port) => {
                log::info!("Connected to breadboard controller on {}", port.port_name);
                let _ = self.shared.events_tx.send(LinkEvent::Connected(port.clone()));
                Ok(port)
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                self.shared.report_connection_failure(&e);
                Err(e)
            }
        }
    }

    async fn open_once(&self) -> Result<SerialDeviceInfo, PortError> {
        self.provider.release_all_grants().await;

        let port = self.provider.request_port().await?;
        let settings = self.settings();
        let streams = self.provider.open(&port, &settings).await?;

        *self.port.lock().await = Some(port.clone());
        *self.writer.lock().await = Some(streams.writer);

        // State must be Connected before the loop takes its first look at it
        self.shared.set_state(ConnectionState::Connected);
        let handle = tokio::spawn(reader_task(
            streams.reader,
            self.shared.clone(),
            self.shared.state_tx.subscribe(),
            settings.buffer_size,
        ));
        *self.read_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(port)
    }

    /// Close the connection. Safe to call at any time, any number of times.
    pub async fn disconnect(&self) {
        let was = self.state();
        self.shared.set_state(ConnectionState::Disconnected);

        // The read loop sees the state change, exits and drops the reader
        let read_task = self.read_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = read_task {
            if let Err(e) = handle.await {
                log::warn!("Serial read loop ended abnormally: {}", e);
            }
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                log::warn!("Error closing serial writer: {}", e);
            }
        }

        if let Some(port) = self.port.lock().await.take() {
            if let Err(e) = self.provider.close(&port).await {
                log::warn!("Error closing port {}: {}", port.port_name, e);
            }
        }

        self.shared
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if was != ConnectionState::Disconnected {
            log::info!("Breadboard controller disconnected");
        }
    }

    /// Send a structure string as a raw, `n`-padded frame
    pub async fn send_structure(&self, structure: &str) -> Result<()> {
        let frame = protocol::structure_frame(structure);
        log::debug!("Sending circuit structure: {}", String::from_utf8_lossy(&frame));
        self.write_frame(&frame).await
    }

    /// Send the reset sentinel
    pub async fn send_reset(&self) -> Result<()> {
        log::debug!("Sending reset sentinel");
        self.write_frame(&protocol::reset_frame()).await
    }

    /// Send a JSON command envelope
    pub async fn send_command(&self, name: &str, parameters: Option<serde_json::Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(TransmitError::NotConnected);
        }
        let timestamp = chrono::Utc::now().timestamp_millis();
        let frame = protocol::command_frame(name, parameters.as_ref(), timestamp)?;
        log::debug!("Sending command {}", name);
        self.write_frame(&frame).await
    }

    pub async fn send_circuit_data(&self, circuit: serde_json::Value) -> Result<()> {
        self.send_command(FirmwareCommand::CircuitData.as_str(), Some(circuit)).await
    }

    pub async fn generate_circuit(&self, components: &[PlacedComponent]) -> Result<()> {
        let parameters = serde_json::json!({ "components": components });
        self.send_command(FirmwareCommand::GenerateCircuit.as_str(), Some(parameters)).await
    }

    pub async fn set_power_source(&self, power_source: serde_json::Value) -> Result<()> {
        self.send_command(FirmwareCommand::SetPowerSource.as_str(), Some(power_source)).await
    }

    pub async fn get_system_status(&self) -> Result<()> {
        self.send_command(FirmwareCommand::GetSystemStatus.as_str(), None).await
    }

    pub async fn reset_system(&self) -> Result<()> {
        self.send_command(FirmwareCommand::ResetSystem.as_str(), None).await
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransmitError::NotConnected);
        }

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(TransmitError::NotConnected)?;

        let written = async {
            writer.write_all(frame).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.shared.update_metrics(|m| m.bytes_written += frame.len() as u64);
                Ok(())
            }
            Err(e) => {
                let err = TransmitError::WriteFailed(e);
                let message = format!("Send failed: {}", err);
                log::error!("{}", message);
                self.shared.update_metrics(|m| m.last_error = Some(message.clone()));
                self.shared.notify_error(&message);
                Err(err)
            }
        }
    }
}
