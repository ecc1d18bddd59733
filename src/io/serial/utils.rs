// src/io/serial/utils.rs
//
// Serial line parameters and their conversion to serialport crate types.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};

// ============================================================================
// Types
// ============================================================================

/// Baud rate the board firmware is built for.
pub const BOARD_BAUD_RATE: u32 = 57_600;

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

/// Line settings used to open a serial transport. Defaults to the board's 57600-8-N-1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLineConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl SerialLineConfig {
    /// Board defaults on the named port.
    pub fn board(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: BOARD_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }

    /// Short form such as `57600-8-N-1`.
    pub fn describe(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert a parity string ("none", "odd", "even") to our Parity type
pub fn parity_from_str(s: &str) -> Parity {
    match s.to_lowercase().as_str() {
        "odd" => Parity::Odd,
        "even" => Parity::Even,
        _ => Parity::None,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================
