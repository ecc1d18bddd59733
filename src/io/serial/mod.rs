// src/io/serial/mod.rs
//
// Serial-line transport to a board: line parameters, the blocking transport
// and port enumeration.

mod transport;
pub mod utils;

pub use transport::{list_port_names, list_serial_ports, SerialPortInfo, SerialTransport};
pub use utils::{Parity, SerialLineConfig, BOARD_BAUD_RATE};
