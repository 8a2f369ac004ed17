#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};
use tokio::sync::broadcast;
use wireless_link_lib::config::LinkConfig;
use wireless_link_lib::serial::interface::{PortProvider, PortStreams};
use wireless_link_lib::serial::{LinkEvent, PortError, ResponseRecord, SerialDeviceInfo, SerialLink, SerialSettings};

pub const MOCK_PORT: &str = "/dev/ttyMOCK0";

/// What the next `open` call does
#[derive(Debug, Clone, Copy)]
pub enum OpenOutcome {
    Ok,
    AlreadyOpen,
    Fail,
    /// Opens, but every read fails
    FailingRead,
}

pub const READ_ERROR: &str = "device unplugged";

struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, READ_ERROR)))
    }
}

/// Port provider backed by an in-memory duplex pipe. The far end of the
/// pipe plays the firmware.
#[derive(Default)]
pub struct MockPortProvider {
    script: Mutex<VecDeque<OpenOutcome>>,
    device: Mutex<Option<DuplexStream>>,
    pub release_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
}

impl MockPortProvider {
    /// Outcomes for successive opens; once exhausted every open succeeds
    pub fn scripted(outcomes: &[OpenOutcome]) -> Self {
        Self {
            script: Mutex::new(outcomes.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Device end of the most recently opened port
    pub fn take_device(&self) -> DuplexStream {
        self.device.lock().unwrap().take().expect("no port opened")
    }

    pub fn opens(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PortProvider for MockPortProvider {
    async fn release_all_grants(&self) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn request_port(&self) -> Result<SerialDeviceInfo, PortError> {
        Ok(SerialDeviceInfo::named(MOCK_PORT))
    }

    async fn open(&self, port: &SerialDeviceInfo, settings: &SerialSettings) -> Result<PortStreams, PortError> {
        assert_eq!(*settings, SerialSettings::FIRMWARE);
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(OpenOutcome::Ok);
        match outcome {
            OpenOutcome::AlreadyOpen => Err(PortError::AlreadyOpen(port.port_name.clone())),
            OpenOutcome::Fail => Err(PortError::Open(format!("{}: permission denied", port.port_name))),
            OpenOutcome::Ok | OpenOutcome::FailingRead => {
                let (local, device) = tokio::io::duplex(1024);
                *self.device.lock().unwrap() = Some(device);
                let (reader, writer) = tokio::io::split(local);
                let reader: wireless_link_lib::serial::interface::BoxedReader = match outcome {
                    OpenOutcome::FailingRead => Box::new(FailingReader),
                    _ => Box::new(reader),
                };
                Ok(PortStreams {
                    reader,
                    writer: Box::new(writer),
                })
            }
        }
    }

    async fn close(&self, _port: &SerialDeviceInfo) -> Result<(), PortError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn mock_link(outcomes: &[OpenOutcome]) -> (Arc<SerialLink>, Arc<MockPortProvider>) {
    let provider = Arc::new(MockPortProvider::scripted(outcomes));
    let link = Arc::new(SerialLink::new(provider.clone(), LinkConfig::default()));
    (link, provider)
}

/// Link already connected to a fresh mock device
pub async fn connected_link() -> (Arc<SerialLink>, Arc<MockPortProvider>, DuplexStream) {
    let (link, provider) = mock_link(&[]);
    link.connect().await.expect("connect");
    let device = provider.take_device();
    (link, provider, device)
}

/// Read exactly `len` bytes the link wrote to the device
pub async fn read_frame(device: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(2), device.read_exact(&mut buf))
        .await
        .expect("timed out waiting for frame")
        .expect("device read");
    buf
}

pub async fn next_record(events: &mut broadcast::Receiver<LinkEvent>) -> ResponseRecord {
    loop {
        match next_event(events).await {
            LinkEvent::Record(record) => return record,
            _ => continue,
        }
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for link event")
        .expect("event channel closed")
}
