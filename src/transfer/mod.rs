// src/transfer/mod.rs
//
// Button upload protocol: shared types, the wire messages, the per-transfer
// state machine, the manager that serializes transfers and whole-board upload.

pub mod batch;
pub mod manager;
pub mod message;
pub mod worker;

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::io::IoError;

pub use batch::{upload_board, BoardUploadReport};
pub use manager::TransferManager;
pub use message::{BoardMessage, HostMessage, Message};
pub use worker::{TransferSession, TransferState, TransferWorker};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Largest payload slice carried by one DATA message.
pub const CHUNK_SIZE: usize = 256;

/// Version byte sent in every START message.
pub const PROTOCOL_VERSION: u8 = 0;

/// Number of button slots on a board.
pub const SLOT_COUNT: usize = 4;

/// Wait for the first byte of any board reply.
pub const FIRST_BYTE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Wait for each further byte of a reply that has started.
pub const INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(20);

/// Extra time the board gets to persist a button after the last chunk.
/// The full RECORDED wait is this plus the first-byte timeout.
pub const RECORD_GRACE: Duration = Duration::from_millis(30_000);

// ============================================================================
// Button Slot
// ============================================================================

/// One of the four button positions on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ButtonSlot(u8);

impl ButtonSlot {
    pub const ALL: [ButtonSlot; SLOT_COUNT] = [ButtonSlot(0), ButtonSlot(1), ButtonSlot(2), ButtonSlot(3)];

    pub fn new(index: u8) -> Result<Self, TransferError> {
        if (index as usize) < SLOT_COUNT {
            Ok(ButtonSlot(index))
        } else {
            Err(TransferError::InvalidSlot(index))
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ButtonSlot {
    type Error = TransferError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        ButtonSlot::new(index)
    }
}

impl fmt::Display for ButtonSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Errors and Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// No byte arrived within the applicable timeout.
    #[error("timed out after {waited_ms} ms waiting for {waiting_for}")]
    Timeout { waiting_for: String, waited_ms: u64 },

    /// The board replied with a message that is not valid in the current state.
    #[error("expected {expected}, board sent {received}")]
    ProtocolViolation { expected: String, received: String },

    #[error("reply checksum mismatch: frame carries 0x{carried:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch { carried: u16, computed: u16 },

    #[error("board refused the transfer")]
    Refused,

    #[error("board aborted the transfer")]
    DeviceAbort,

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("failed to serialize button profile: {0}")]
    Serialization(String),

    #[error("a transfer is already in progress")]
    Busy,

    #[error("invalid button slot {0}, expected 0-3")]
    InvalidSlot(u8),

    #[error("a board holds 1 to 4 buttons, got {0}")]
    BoardSize(usize),

    #[error("failed to start transfer worker: {0}")]
    Worker(String),
}

/// Terminal result of one button transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    Refused,
    Aborted { reason: TransferError },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Succeeded)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferOutcome::Succeeded => "succeeded",
            TransferOutcome::Refused => "refused",
            TransferOutcome::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Aborted { reason } => write!(f, "aborted ({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub slot: ButtonSlot,
    pub bytes_sent: usize,
    pub total_bytes: usize,
}

impl TransferProgress {
    /// Share of the payload already acknowledged, in `[0, 1)` while chunks remain.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_sent as f64 / self.total_bytes as f64
        }
    }
}

/// Delivered to listeners in order: zero or more `Progress`, then exactly one `Finished`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(TransferProgress),
    Finished { slot: ButtonSlot, outcome: TransferOutcome },
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimings {
    pub first_byte: Duration,
    pub inter_byte: Duration,
    pub record: Duration,
}

impl ProtocolTimings {
    /// Build from millisecond values. `record_grace_ms` is extended by the
    /// first-byte timeout the same way the defaults are.
    pub fn from_millis(first_byte_ms: u64, inter_byte_ms: u64, record_grace_ms: u64) -> Self {
        Self {
            first_byte: Duration::from_millis(first_byte_ms),
            inter_byte: Duration::from_millis(inter_byte_ms),
            record: Duration::from_millis(record_grace_ms.saturating_add(first_byte_ms)),
        }
    }
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            first_byte: FIRST_BYTE_TIMEOUT,
            inter_byte: INTER_BYTE_TIMEOUT,
            record: RECORD_GRACE + FIRST_BYTE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub timings: ProtocolTimings,
    /// Reject board replies whose checksum does not match their contents.
    pub verify_checksums: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timings: ProtocolTimings::default(),
            verify_checksums: true,
        }
    }
}
