use std::collections::HashSet;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

use super::{PortError, SerialDeviceInfo, SerialSettings, STLINK_VID};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read and write halves of an opened port
pub struct PortStreams {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

/// Source of serial ports for a [`SerialLink`](super::SerialLink).
///
/// The provider tracks every port it has granted so stale grants from an
/// earlier session can be released before a new port is requested.
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Release every port previously granted by this provider. Idempotent.
    async fn release_all_grants(&self);

    /// Choose the port to connect to
    async fn request_port(&self) -> Result<SerialDeviceInfo, PortError>;

    /// Open `port` with the given line settings
    async fn open(&self, port: &SerialDeviceInfo, settings: &SerialSettings) -> Result<PortStreams, PortError>;

    /// Release the grant for `port`
    async fn close(&self, port: &SerialDeviceInfo) -> Result<(), PortError>;
}

/// List serial ports known to the operating system
pub fn list_ports() -> Result<Vec<SerialDeviceInfo>, PortError> {
    let ports = serialport::available_ports()?;
    let mut devices = Vec::with_capacity(ports.len());

    for port in ports {
        let device = match port.port_type {
            SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                port_name: port.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                serial_number: usb_info.serial_number,
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
                is_stlink: usb_info.vid == STLINK_VID,
            },
            _ => SerialDeviceInfo::named(port.port_name),
        };
        devices.push(device);
    }

    Ok(devices)
}

/// Ports backed by the operating system through `tokio-serial`
pub struct SystemPortProvider {
    preferred: Option<String>,
    granted: Mutex<HashSet<String>>,
}

impl SystemPortProvider {
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            preferred,
            granted: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for SystemPortProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl PortProvider for SystemPortProvider {
    /// Forget every port name granted so far. OS handles are owned by the
    /// `SerialStream` halves handed out by `open` and close when those drop,
    /// so there is nothing else to release here.
    async fn release_all_grants(&self) {
        let mut granted = self.granted.lock().await;
        for name in granted.drain() {
            log::debug!("Released stale grant for {}", name);
        }
    }

    async fn request_port(&self) -> Result<SerialDeviceInfo, PortError> {
        let ports = list_ports()?;

        if let Some(name) = &self.preferred {
            // Ports the OS does not enumerate (ptys, bridges) are still allowed by name
            let info = ports
                .into_iter()
                .find(|p| &p.port_name == name)
                .unwrap_or_else(|| SerialDeviceInfo::named(name.clone()));
            return Ok(info);
        }

        let mut ports = ports;
        if let Some(pos) = ports.iter().position(|p| p.is_stlink) {
            return Ok(ports.swap_remove(pos));
        }
        ports.into_iter().next().ok_or(PortError::NoPortSelected)
    }

    async fn open(&self, port: &SerialDeviceInfo, settings: &SerialSettings) -> Result<PortStreams, PortError> {
        let parity = if settings.parity { Parity::Even } else { Parity::None };
        let flow_control = if settings.flow_control { FlowControl::Hardware } else { FlowControl::None };
        let stop_bits = if settings.stop_bits == 2 { StopBits::Two } else { StopBits::One };

        let stream = tokio_serial::new(&port.port_name, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| classify_open_error(&port.port_name, e))?;

        self.granted.lock().await.insert(port.port_name.clone());

        let (reader, writer) = tokio::io::split(stream);
        Ok(PortStreams {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    async fn close(&self, port: &SerialDeviceInfo) -> Result<(), PortError> {
        self.granted.lock().await.remove(&port.port_name);
        Ok(())
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn classify_open_error(port_name: &str, err: serialport::Error) -> PortError {
    let description = err.description.to_lowercase();
    if description.contains("busy") || description.contains("already open") || description.contains("access is denied") {
        return PortError::AlreadyOpen(port_name.to_string());
    }
    match err.kind {
        serialport::ErrorKind::NoDevice => PortError::NotFound(port_name.to_string()),
        _ => PortError::Open(format!("{}: {}", port_name, err.description)),
    }
}
