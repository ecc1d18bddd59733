// src/io/mod.rs
//
// Byte transport abstraction for talking to a board.
// Provides the blocking send/receive contract the transfer protocol drives,
// a serial-line implementation, and an in-memory simulated board.

mod error;
pub mod serial;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

pub use error::IoError;
pub use serial::{list_port_names, list_serial_ports, SerialLineConfig, SerialPortInfo, SerialTransport};
pub use simulated::{BoardBehavior, SimulatedBoard};

/// Blocking byte transport to a single board.
///
/// All methods take `&self` so one handle can be shared between the manager
/// and the worker thread currently driving a transfer. At most one thread
/// performs I/O at a time; the manager enforces that.
pub trait Transport: Send + Sync {
    /// Label used in log lines and errors, e.g. `serial(/dev/ttyUSB0)`.
    fn device(&self) -> &str;

    /// Write every byte and flush. Fails once the transport is disconnected.
    fn send(&self, bytes: &[u8]) -> Result<(), IoError>;

    /// Return the next byte, waiting at most `timeout` for it to arrive.
    /// Fails with [`IoError::Timeout`] when the deadline passes.
    fn receive_byte(&self, timeout: Duration) -> Result<u8, IoError>;

    /// Release the underlying resource. Idempotent.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn device(&self) -> &str {
        (**self).device()
    }

    fn send(&self, bytes: &[u8]) -> Result<(), IoError> {
        (**self).send(bytes)
    }

    fn receive_byte(&self, timeout: Duration) -> Result<u8, IoError> {
        (**self).receive_byte(timeout)
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
