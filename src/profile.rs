// src/profile.rs
//
// Button profiles and their payload encoding.
//
// Payload layout: icon rows (8 bytes) | sample count (u16 BE) | samples.
// Samples are signed 8-bit PCM in memory and unsigned-biased on the wire.

use std::time::Duration;

use crate::transfer::TransferError;

// ============================================================================
// Constants
// ============================================================================

/// Icon width and height in pixels.
pub const ICON_SIZE: usize = 8;

/// Bytes an icon occupies in a payload, one per row.
pub const ICON_BYTES: usize = ICON_SIZE * ICON_SIZE / 8;

/// Sound sample rate in Hz. Samples are 8-bit mono.
pub const SAMPLE_RATE: u32 = 8000;

/// Length of a full-size recording, four seconds minus the icon's share of
/// board memory.
pub const SOUND_SAMPLES: usize = SAMPLE_RATE as usize * 4 - ICON_BYTES;

/// XOR mask between signed samples and their unsigned wire form.
const SAMPLE_BIAS: u8 = 0x80;

// ============================================================================
// Icon
// ============================================================================

/// 8x8 monochrome bitmap. Row `y` is one byte; bit `x` (LSB first) is column `x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Icon {
    rows: [u8; ICON_SIZE],
}

impl Icon {
    pub fn from_rows(rows: [u8; ICON_SIZE]) -> Self {
        Self { rows }
    }

    /// Parse 16 hex digits, top row first.
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("Invalid icon hex '{}': {}", s, e))?;
        let rows: [u8; ICON_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("Icon needs {} bytes, got {}", ICON_BYTES, b.len()))?;
        Ok(Self { rows })
    }

    pub fn rows(&self) -> [u8; ICON_SIZE] {
        self.rows
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.rows)
    }

    /// Pixel at column `x`, row `y`. Out-of-range coordinates read as off.
    pub fn get(&self, x: usize, y: usize) -> bool {
        x < ICON_SIZE && y < ICON_SIZE && self.rows[y] & (1 << x) != 0
    }

    /// Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        if x >= ICON_SIZE || y >= ICON_SIZE {
            return;
        }
        if on {
            self.rows[y] |= 1 << x;
        } else {
            self.rows[y] &= !(1 << x);
        }
    }

    /// Number of lit pixels.
    pub fn lit(&self) -> u32 {
        self.rows.iter().map(|r| r.count_ones()).sum()
    }
}

// ============================================================================
// Sound
// ============================================================================

/// Signed 8-bit PCM clip at `SAMPLE_RATE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sound {
    samples: Vec<i8>,
}

impl Sound {
    pub fn from_signed(samples: Vec<i8>) -> Self {
        Self { samples }
    }

    /// Build from unsigned-biased samples as stored on the board.
    pub fn from_unsigned(samples: &[u8]) -> Self {
        Self {
            samples: samples.iter().map(|&s| (s ^ SAMPLE_BIAS) as i8).collect(),
        }
    }

    pub fn silent(len: usize) -> Self {
        Self { samples: vec![0; len] }
    }

    pub fn samples(&self) -> &[i8] {
        &self.samples
    }

    pub fn to_unsigned(&self) -> Vec<u8> {
        self.samples.iter().map(|&s| s as u8 ^ SAMPLE_BIAS).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / SAMPLE_RATE as f64)
    }

    /// Sub-clip of at most `len` samples starting at `start`.
    pub fn clip(&self, start: usize, len: usize) -> Sound {
        let start = start.min(self.samples.len());
        let end = start.saturating_add(len).min(self.samples.len());
        Sound::from_signed(self.samples[start..end].to_vec())
    }
}

// ============================================================================
// Button Profile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonProfile {
    pub name: String,
    pub icon: Icon,
    pub sound: Sound,
}

impl ButtonProfile {
    pub fn new(name: impl Into<String>, icon: Icon, sound: Sound) -> Self {
        Self {
            name: name.into(),
            icon,
            sound,
        }
    }

    /// Bytes sent to the board for this button.
    pub fn to_payload(&self) -> Result<Vec<u8>, TransferError> {
        let count = u16::try_from(self.sound.len()).map_err(|_| {
            TransferError::Serialization(format!(
                "sound for '{}' has {} samples, at most {} fit",
                self.name,
                self.sound.len(),
                u16::MAX
            ))
        })?;

        let mut payload = Vec::with_capacity(ICON_BYTES + 2 + self.sound.len());
        payload.extend_from_slice(&self.icon.rows());
        payload.extend_from_slice(&count.to_be_bytes());
        payload.extend(self.sound.to_unsigned());
        Ok(payload)
    }

    /// Rebuild a profile from payload bytes. Trailing bytes are ignored.
    pub fn from_payload(name: impl Into<String>, payload: &[u8]) -> Result<Self, TransferError> {
        let name = name.into();
        let header = ICON_BYTES + 2;
        if payload.len() < header {
            return Err(TransferError::Serialization(format!(
                "payload for '{}' is {} bytes, header needs {}",
                name,
                payload.len(),
                header
            )));
        }

        let mut rows = [0u8; ICON_SIZE];
        rows.copy_from_slice(&payload[..ICON_BYTES]);
        let count = u16::from_be_bytes([payload[ICON_BYTES], payload[ICON_BYTES + 1]]) as usize;
        let samples = &payload[header..];
        if samples.len() < count {
            return Err(TransferError::Serialization(format!(
                "payload for '{}' declares {} samples but carries {}",
                name,
                count,
                samples.len()
            )));
        }

        Ok(Self {
            name,
            icon: Icon::from_rows(rows),
            sound: Sound::from_unsigned(&samples[..count]),
        })
    }
}
