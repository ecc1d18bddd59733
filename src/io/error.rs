// src/io/error.rs
//
// Typed transport errors. Every variant carries the device label so log lines
// and CLI output say which line failed.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// The device could not be opened.
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    /// The device opened but rejected its line parameters.
    #[error("{device}: failed to configure line: {message}")]
    Configure { device: String, message: String },

    /// Nothing arrived before the deadline.
    #[error("{device}: timed out after {waited_ms} ms waiting for {operation}")]
    Timeout {
        device: String,
        operation: String,
        waited_ms: u64,
    },

    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    /// The transport was disconnected (or never connected).
    #[error("{device}: not connected")]
    NotConnected { device: String },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn configure(device: &str, message: impl Into<String>) -> Self {
        IoError::Configure {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, operation: &str, waited: Duration) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            operation: operation.to_string(),
            waited_ms: waited.as_millis() as u64,
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn not_connected(device: &str) -> Self {
        IoError::NotConnected {
            device: device.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, IoError::Timeout { .. })
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
