// src/io/serial/transport.rs
//
// Blocking serial-line transport plus port enumeration.
// Reads are buffered: each OS read pulls up to a chunk of bytes into a queue and
// `receive_byte` hands them out one at a time against a per-call deadline.

use serde::Serialize;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::utils::{to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, SerialLineConfig};
use crate::io::{IoError, Transport};
use crate::tlog;

/// Bytes requested per OS read.
const READ_CHUNK: usize = 256;

/// Timeout the port is opened with; every read sets its own.
const OPEN_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Types
// ============================================================================

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

struct PortState {
    port: Option<Box<dyn serialport::SerialPort>>,
    rx: VecDeque<u8>,
}

// ============================================================================
// Serial Transport
// ============================================================================

/// A board reached over a serial line.
pub struct SerialTransport {
    device: String,
    line: SerialLineConfig,
    state: Mutex<PortState>,
}

impl SerialTransport {
    /// Open and configure the port. On any failure the port is released before returning.
    pub fn open(line: &SerialLineConfig) -> Result<Self, IoError> {
        let device = format!("serial({})", line.port);

        let mut port = serialport::new(&line.port, line.baud_rate)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        // `port` is dropped (closed) on the early return.
        configure_line(&mut *port, line).map_err(|e| IoError::configure(&device, e.to_string()))?;

        tlog!("[serial] Opened {} at {}", line.port, line.describe());

        Ok(Self {
            device,
            line: line.clone(),
            state: Mutex::new(PortState {
                port: Some(port),
                rx: VecDeque::with_capacity(READ_CHUNK),
            }),
        })
    }

    pub fn line(&self) -> &SerialLineConfig {
        &self.line
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Apply line parameters after open so a rejected one is reported as such.
fn configure_line(port: &mut dyn serialport::SerialPort, line: &SerialLineConfig) -> serialport::Result<()> {
    port.set_data_bits(to_serialport_data_bits(line.data_bits))?;
    port.set_stop_bits(to_serialport_stop_bits(line.stop_bits))?;
    port.set_parity(to_serialport_parity(&line.parity))?;
    port.set_flow_control(serialport::FlowControl::None)?;
    Ok(())
}

impl Transport for SerialTransport {
    fn device(&self) -> &str {
        &self.device
    }

    fn send(&self, bytes: &[u8]) -> Result<(), IoError> {
        let mut state = self.lock();
        let port = state
            .port
            .as_mut()
            .ok_or_else(|| IoError::not_connected(&self.device))?;
        port.write_all(bytes)
            .map_err(|e| IoError::write(&self.device, e.to_string()))?;
        port.flush().map_err(|e| IoError::write(&self.device, e.to_string()))
    }

    fn receive_byte(&self, timeout: Duration) -> Result<u8, IoError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        if let Some(byte) = state.rx.pop_front() {
            return Ok(byte);
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(IoError::timeout(&self.device, "byte", timeout));
            }

            let port = state
                .port
                .as_mut()
                .ok_or_else(|| IoError::not_connected(&self.device))?;
            port.set_timeout(remaining)
                .map_err(|e| IoError::read(&self.device, e.to_string()))?;

            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    state.rx.extend(&buf[..n]);
                    if let Some(byte) = state.rx.pop_front() {
                        return Ok(byte);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(IoError::timeout(&self.device, "byte", timeout));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::read(&self.device, e.to_string())),
            }
        }
    }

    fn disconnect(&self) {
        let mut state = self.lock();
        state.rx.clear();
        if state.port.take().is_some() {
            tlog!("[serial] Closed {}", self.line.port);
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports = serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
                serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}

/// Port names only, for pickers and quick listings.
pub fn list_port_names() -> Result<Vec<String>, String> {
    Ok(list_serial_ports()?.into_iter().map(|p| p.port_name).collect())
}
