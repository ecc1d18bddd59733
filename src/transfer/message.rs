// src/transfer/message.rs
//
// Wire messages: type(1) | length(2, BE) | payload | checksum(2, BE).
// The checksum is the 16-bit sum of every byte before it.

use std::time::Duration;

use super::{ButtonSlot, TransferError, CHUNK_SIZE, PROTOCOL_VERSION};
use crate::checksums::{validate_sum16_trailer, Sum16};
use crate::io::{IoError, Transport};

/// Bytes before the payload: type code plus length.
pub const HEADER_LEN: usize = 3;
/// Bytes after the payload.
pub const TRAILER_LEN: usize = 2;

// ============================================================================
// Message Codes
// ============================================================================

/// Codes the host sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostMessage {
    Start = 0x03,
    Data = 0x0C,
    Abort = 0x0F,
}

impl HostMessage {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(HostMessage::Start),
            0x0C => Some(HostMessage::Data),
            0x0F => Some(HostMessage::Abort),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HostMessage::Start => "START",
            HostMessage::Data => "DATA",
            HostMessage::Abort => "ABORT",
        }
    }
}

/// Codes the board replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BoardMessage {
    Permit = 0xB3,
    Refuse = 0xBC,
    ChunkAck = 0xB6,
    DeviceAbort = 0xBF,
    Recorded = 0xB0,
}

impl BoardMessage {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0xB3 => Some(BoardMessage::Permit),
            0xBC => Some(BoardMessage::Refuse),
            0xB6 => Some(BoardMessage::ChunkAck),
            0xBF => Some(BoardMessage::DeviceAbort),
            0xB0 => Some(BoardMessage::Recorded),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BoardMessage::Permit => "PERMIT",
            BoardMessage::Refuse => "REFUSE",
            BoardMessage::ChunkAck => "CHUNK_ACK",
            BoardMessage::DeviceAbort => "DEVICE_ABORT",
            BoardMessage::Recorded => "RECORDED",
        }
    }
}

// ============================================================================
// Message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: u8, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Transfer request for a slot.
    pub fn start(slot: ButtonSlot) -> Self {
        Self::new(HostMessage::Start.code(), vec![slot.index(), PROTOCOL_VERSION])
    }

    pub fn data(chunk: &[u8]) -> Self {
        debug_assert!(chunk.len() <= CHUNK_SIZE);
        Self::new(HostMessage::Data.code(), chunk.to_vec())
    }

    /// Empty DATA marking the end of the payload.
    pub fn end_of_payload() -> Self {
        Self::new(HostMessage::Data.code(), Vec::new())
    }

    pub fn abort() -> Self {
        Self::new(HostMessage::Abort.code(), Vec::new())
    }

    /// Reply without payload, as the board firmware sends them.
    pub fn board(kind: BoardMessage) -> Self {
        Self::new(kind.code(), Vec::new())
    }

    pub fn board_kind(&self) -> Option<BoardMessage> {
        BoardMessage::from_code(self.kind)
    }

    pub fn host_kind(&self) -> Option<HostMessage> {
        HostMessage::from_code(self.kind)
    }

    /// Human-readable type for logs and errors.
    pub fn kind_name(&self) -> String {
        if let Some(k) = self.board_kind() {
            k.name().to_string()
        } else if let Some(k) = self.host_kind() {
            k.name().to_string()
        } else {
            format!("0x{:02X}", self.kind)
        }
    }

    /// Full wire frame with the checksum recomputed.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        frame.push(self.kind);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&self.payload);

        let mut sum = Sum16::new();
        sum.update(&frame);
        frame.extend_from_slice(&sum.value().to_be_bytes());
        frame
    }

    /// Parse one complete frame from the front of `buf`.
    ///
    /// Returns the message, the number of bytes it occupied and whether its
    /// checksum matched, or `None` if `buf` does not yet hold a whole frame.
    pub fn parse(buf: &[u8]) -> Option<(Message, usize, bool)> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let total = HEADER_LEN + len + TRAILER_LEN;
        if buf.len() < total {
            return None;
        }
        let valid = validate_sum16_trailer(&buf[..total]).map(|r| r.valid).unwrap_or(false);
        let msg = Message::new(buf[0], buf[HEADER_LEN..HEADER_LEN + len].to_vec());
        Some((msg, total, valid))
    }
}

// ============================================================================
// Receiving
// ============================================================================

fn receive_error(e: IoError, waiting_for: &str, waited: Duration) -> TransferError {
    if e.is_timeout() {
        TransferError::Timeout {
            waiting_for: waiting_for.to_string(),
            waited_ms: waited.as_millis() as u64,
        }
    } else {
        TransferError::Io(e)
    }
}

/// Read one message from the transport.
///
/// The first byte may take up to `first_timeout`; every later byte of the same
/// message must follow within `inter_timeout`.
pub fn read_message(
    transport: &dyn Transport,
    first_timeout: Duration,
    inter_timeout: Duration,
    verify_checksum: bool,
) -> Result<Message, TransferError> {
    let next = |timeout: Duration, what: &str| {
        transport
            .receive_byte(timeout)
            .map_err(|e| receive_error(e, what, timeout))
    };

    let kind = next(first_timeout, "start of reply")?;
    let len_hi = next(inter_timeout, "reply length")?;
    let len_lo = next(inter_timeout, "reply length")?;
    let len = u16::from_be_bytes([len_hi, len_lo]) as usize;

    let mut frame = Vec::with_capacity(HEADER_LEN + len + TRAILER_LEN);
    frame.extend_from_slice(&[kind, len_hi, len_lo]);
    for _ in 0..len {
        frame.push(next(inter_timeout, "reply payload")?);
    }
    for _ in 0..TRAILER_LEN {
        frame.push(next(inter_timeout, "reply checksum")?);
    }

    if verify_checksum {
        if let Some(check) = validate_sum16_trailer(&frame) {
            if !check.valid {
                return Err(TransferError::ChecksumMismatch {
                    carried: check.extracted,
                    computed: check.calculated,
                });
            }
        }
    }

    let payload = frame[HEADER_LEN..HEADER_LEN + len].to_vec();
    Ok(Message::new(kind, payload))
}
