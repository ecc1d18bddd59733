// src/settings.rs
//
// Persistent user settings: serial line, protocol timings and logging.
// Stored as pretty-printed JSON; missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::serial::utils::parity_from_str;
use crate::io::SerialLineConfig;
use crate::transfer::{ProtocolTimings, TransferOptions};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Serial port used when none is given on the command line.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: String, // "none" | "odd" | "even"
    #[serde(default = "default_first_byte_timeout_ms")]
    pub first_byte_timeout_ms: u64,
    #[serde(default = "default_inter_byte_timeout_ms")]
    pub inter_byte_timeout_ms: u64,
    /// Extra wait for RECORDED, on top of the first-byte timeout.
    #[serde(default = "default_record_timeout_ms")]
    pub record_timeout_ms: u64,
    #[serde(default = "default_verify_checksums")]
    pub verify_checksums: bool,
    /// When set, log lines are mirrored into files in this directory.
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_baud_rate() -> u32 {
    crate::io::serial::BOARD_BAUD_RATE
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_parity() -> String {
    "none".to_string()
}
fn default_first_byte_timeout_ms() -> u64 {
    2000
}
fn default_inter_byte_timeout_ms() -> u64 {
    20
}
fn default_record_timeout_ms() -> u64 {
    30_000
}
fn default_verify_checksums() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            first_byte_timeout_ms: default_first_byte_timeout_ms(),
            inter_byte_timeout_ms: default_inter_byte_timeout_ms(),
            record_timeout_ms: default_record_timeout_ms(),
            verify_checksums: default_verify_checksums(),
            log_dir: None,
        }
    }
}

impl AppSettings {
    /// Line parameters for `port`, or for the configured port when `None`.
    pub fn line_config(&self, port: Option<&str>) -> Result<SerialLineConfig, String> {
        let port = port
            .map(str::to_string)
            .or_else(|| self.port.clone())
            .ok_or_else(|| "No serial port given and none configured".to_string())?;

        Ok(SerialLineConfig {
            port,
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: parity_from_str(&self.parity),
        })
    }

    pub fn protocol_timings(&self) -> ProtocolTimings {
        ProtocolTimings::from_millis(
            self.first_byte_timeout_ms,
            self.inter_byte_timeout_ms,
            self.record_timeout_ms,
        )
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            timings: self.protocol_timings(),
            verify_checksums: self.verify_checksums,
        }
    }
}

/// Default settings file location: `<config dir>/boardlink/settings.json`.
pub fn settings_path() -> Result<PathBuf, String> {
    let config_dir = dirs::config_dir().ok_or_else(|| "Failed to get config dir".to_string())?;
    Ok(config_dir.join("boardlink").join("settings.json"))
}

/// Load settings from `path`. On first run the defaults are written there.
pub fn load_settings(path: &Path) -> Result<AppSettings, String> {
    if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to read settings: {}", e))?;

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
    } else {
        // First run: create default settings
        let settings = AppSettings::default();
        save_settings(path, &settings)?;
        Ok(settings)
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings dir: {}", e))?;
    }

    initialize_directories(settings)?;

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}

fn initialize_directories(settings: &AppSettings) -> Result<(), String> {
    if let Some(log_dir) = &settings.log_dir {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create log directory: {}", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::Parity;
    use std::time::Duration;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "boardlink-settings-{}-{}-{}",
            tag,
            std::process::id(),
            chrono::Local::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn test_defaults_match_board() {
        let s = AppSettings::default();
        let line = s.line_config(Some("/dev/ttyUSB0")).unwrap();
        assert_eq!(line.describe(), "57600-8-N-1");
        assert_eq!(s.protocol_timings(), ProtocolTimings::default());
        assert!(s.transfer_options().verify_checksums);
    }

    #[test]
    fn test_line_config_requires_port() {
        let mut s = AppSettings::default();
        assert!(s.line_config(None).is_err());

        s.port = Some("COM3".to_string());
        s.parity = "even".to_string();
        let line = s.line_config(None).unwrap();
        assert_eq!(line.port, "COM3");
        assert_eq!(line.parity, Parity::Even);
        assert_eq!(s.line_config(Some("COM4")).unwrap().port, "COM4");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let s: AppSettings = serde_json::from_str(r#"{"port": "/dev/ttyACM0", "record_timeout_ms": 5000}"#).unwrap();
        assert_eq!(s.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(s.baud_rate, 57600);
        assert_eq!(s.inter_byte_timeout_ms, 20);
        assert_eq!(s.protocol_timings().record, Duration::from_millis(7000));
    }

    #[test]
    fn test_first_run_writes_defaults() {
        let dir = temp_dir("first-run");
        let path = dir.join("nested").join("settings.json");

        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded, AppSettings::default());
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_dir("save");
        let path = dir.join("settings.json");

        let settings = AppSettings {
            port: Some("/dev/ttyUSB1".to_string()),
            verify_checksums: false,
            log_dir: Some(dir.join("logs").to_string_lossy().into_owned()),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert!(dir.join("logs").is_dir());
        assert_eq!(load_settings(&path).unwrap(), settings);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_settings(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse settings"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
