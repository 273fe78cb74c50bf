//! ==============================================================================
//! hal.rs - Modbus RTU hardware access
//! ==============================================================================
//!
//! purpose:
//!     the real implementation behind channel.rs. talks to the soil sensor over
//!     an RS-485 USB adapter using tokio-modbus (rtu) on top of tokio-serial.
//!
//! transport semantics:
//!     every register read is its own open / clear buffers / transact / close
//!     cycle. the serial port is never held open between polls, so a sensor that
//!     is unplugged and replugged is picked up again without restarting.
//!
//! also here:
//!     - find_port(): probe the serial ports for something answering register 0
//!     - derive_device_id(): stable id from the adapter's usb serial number
//!
//! relationships:
//!     - implements: channel::Connector, channel::RegisterTransport
//!     - used by: main.rs (startup wiring)
//!
//! ==============================================================================

use crate::channel::{ChannelError, Connector, RegisterTransport, MOISTURE_REGISTER};
use crate::config::SerialConfig;
use crate::domain::{DeviceId, PortId};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio_modbus::client::{rtu, Reader};
use tokio_modbus::slave::Slave;
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortType, SerialStream, StopBits};

/// 8-N-1 line settings plus the modbus slave address
#[derive(Debug, Clone)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub slave: u8,
    pub response_timeout: Duration,
}

impl LineSettings {
    pub fn from_config(serial: &SerialConfig) -> Self {
        Self {
            baud_rate: serial.baud_rate,
            slave: serial.slave,
            response_timeout: Duration::from_millis(serial.response_timeout_ms),
        }
    }

    fn open(&self, port: &PortId) -> io::Result<SerialStream> {
        let builder = tokio_serial::new(port.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.response_timeout);
        Ok(SerialStream::open(&builder)?)
    }
}

// ==============================================================================
// connector
// ==============================================================================

pub struct RtuConnector {
    settings: LineSettings,
}

impl RtuConnector {
    pub fn new(settings: LineSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for RtuConnector {
    async fn connect(&self, port: &PortId) -> Result<Box<dyn RegisterTransport>, ChannelError> {
        // open once so a missing device or a permission problem shows up now
        // instead of on the first read. dropping the stream closes it again.
        drop(self.settings.open(port)?);

        Ok(Box::new(RtuTransport { port: port.clone(), settings: self.settings.clone() }))
    }
}

// ==============================================================================
// transport
// ==============================================================================

struct RtuTransport {
    port: PortId,
    settings: LineSettings,
}

#[async_trait]
impl RegisterTransport for RtuTransport {
    async fn read_holding_register(&mut self, address: u16) -> Result<u16, ChannelError> {
        read_register_once(&self.port, &self.settings, address).await
    }
}

async fn read_register_once(
    port: &PortId,
    settings: &LineSettings,
    address: u16,
) -> Result<u16, ChannelError> {
    let stream = settings.open(port)?;
    stream
        .clear(tokio_serial::ClearBuffer::All)
        .map_err(io::Error::from)?;

    let mut ctx = rtu::attach_slave(stream, Slave(settings.slave));
    let request = ctx.read_holding_registers(address, 1);
    let response = tokio::time::timeout(settings.response_timeout, request)
        .await
        .map_err(|_| ChannelError::NoResponse)?;
    // ctx (and the serial stream inside it) is dropped at the end of this call

    match response {
        Ok(Ok(words)) => words
            .first()
            .copied()
            .ok_or_else(|| ChannelError::InvalidResponse("empty register response".to_string())),
        Ok(Err(exception)) => Err(ChannelError::InvalidResponse(format!(
            "modbus exception {:?} reading register {}",
            exception, address
        ))),
        Err(tokio_modbus::Error::Transport(e)) if e.kind() == io::ErrorKind::TimedOut => {
            Err(ChannelError::NoResponse)
        }
        Err(tokio_modbus::Error::Transport(e)) => Err(ChannelError::Io(e)),
        Err(e) => Err(ChannelError::InvalidResponse(e.to_string())),
    }
}

// ==============================================================================
// port discovery
// ==============================================================================

/// first serial port with a sensor answering register 0
pub async fn find_port(serial: &SerialConfig) -> Option<PortId> {
    let ports = match tokio_serial::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::error!("error listing serial ports: {}", e);
            return None;
        }
    };

    let probe = LineSettings {
        response_timeout: Duration::from_millis(serial.probe_timeout_ms),
        ..LineSettings::from_config(serial)
    };

    for info in ports {
        if matches!(info.port_type, SerialPortType::BluetoothPort) {
            continue;
        }
        let port = PortId::new(info.port_name);
        tracing::debug!("scanning port {}...", port);
        match read_register_once(&port, &probe, MOISTURE_REGISTER).await {
            Ok(_) => {
                tracing::info!("found sensor on {}", port);
                return Some(port);
            }
            Err(e) => tracing::debug!("no sensor on {}: {}", port, e),
        }
    }
    None
}

// ==============================================================================
// device identity
// ==============================================================================

const USB_SERIAL_MARKERS: [&str; 3] = ["USB-SERIAL", "CH340", "USB SERIAL"];

/// `<prefix>_<usb serial>` of the first usb-serial adapter found
pub fn derive_device_id(prefix: &str) -> DeviceId {
    let ports = tokio_serial::available_ports().unwrap_or_else(|e| {
        tracing::error!("error checking ports: {}", e);
        Vec::new()
    });

    for info in ports {
        if let SerialPortType::UsbPort(usb) = info.port_type {
            let description = format!(
                "{} {}",
                usb.product.as_deref().unwrap_or_default(),
                usb.manufacturer.as_deref().unwrap_or_default()
            );
            if looks_like_usb_serial(&description) {
                return identity_for(prefix, usb.serial_number.as_deref(), &info.port_name);
            }
        }
    }

    DeviceId::new(format!("{}_UNKNOWN_DEVICE", prefix))
}

fn looks_like_usb_serial(description: &str) -> bool {
    let upper = description.to_uppercase();
    USB_SERIAL_MARKERS.iter().any(|m| upper.contains(m))
}

// cheap clones often report no serial number; fall back to the port name
fn identity_for(prefix: &str, serial_number: Option<&str>, port_name: &str) -> DeviceId {
    match serial_number.filter(|s| !s.trim().is_empty()) {
        Some(serial) => DeviceId::new(format!("{}_{}", prefix, serial.trim())),
        None => {
            let port = port_name.replace('/', "_").replace("COM", "");
            DeviceId::new(format!("{}_{}", prefix, port))
        }
    }
}
