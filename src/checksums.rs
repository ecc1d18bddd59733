// src/checksums.rs
//
// Additive checksums used by the board link protocol.
// Every frame ends with a 16-bit big-endian sum of all preceding bytes.

use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// Result of validating a frame trailer against its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumValidationResult {
    /// The checksum value carried in the frame trailer
    pub extracted: u16,
    /// The checksum recomputed over the frame contents
    pub calculated: u16,
    /// Whether the checksum is valid (extracted == calculated)
    pub valid: bool,
}

// ============================================================================
// Running Sum
// ============================================================================

/// Incremental 16-bit additive checksum.
///
/// The accumulator is wider than the result, so the value is the full sum of
/// every byte fed truncated to its low 16 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sum16 {
    acc: u32,
}

impl Sum16 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.acc = self.acc.wrapping_add(byte as u32);
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.acc = self.acc.wrapping_add(byte as u32);
    }

    pub fn value(&self) -> u16 {
        (self.acc & 0xFFFF) as u16
    }
}

// ============================================================================
// Named Checksum Functions
// ============================================================================

/// Modulo-65536 sum of bytes (16-bit sum).
pub fn sum16_checksum(data: &[u8]) -> u16 {
    let mut sum = Sum16::new();
    sum.update(data);
    sum.value()
}

/// Validate a complete frame whose last two bytes are a big-endian sum16 of
/// everything before them. Returns `None` for frames shorter than the trailer.
pub fn validate_sum16_trailer(frame: &[u8]) -> Option<ChecksumValidationResult> {
    if frame.len() < 2 {
        return None;
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    let extracted = u16::from_be_bytes([trailer[0], trailer[1]]);
    let calculated = sum16_checksum(body);
    Some(ChecksumValidationResult {
        extracted,
        calculated,
        valid: extracted == calculated,
    })
}
