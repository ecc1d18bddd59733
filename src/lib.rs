// src/lib.rs
//
// boardlink: pushes button profiles (icon + sound) to a FunIcon board over a
// serial line using a framed, checksummed stop-and-wait protocol.
//
// Layering, bottom up:
// - io:       Transport trait, serial-line transport, simulated board
// - transfer: wire messages, per-button state machine, manager, board upload
// - profile:  button profile payload encoding
// - settings: persisted line/timing configuration

pub mod checksums;
pub mod io;
pub mod logging;
pub mod profile;
pub mod settings;
pub mod transfer;

pub use io::{IoError, SerialLineConfig, SerialTransport, Transport};
pub use profile::{ButtonProfile, Icon, Sound};
pub use settings::AppSettings;
pub use transfer::{
    upload_board, BoardUploadReport, ButtonSlot, ProtocolTimings, TransferError, TransferEvent, TransferManager,
    TransferOptions, TransferOutcome, TransferProgress,
};
