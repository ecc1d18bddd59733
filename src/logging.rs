// src/logging.rs
//
// Timestamped stderr logging with an optional mirror file.
// Every component logs through `tlog!` with a bracketed tag, e.g. `[transfer]`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the stable symlink pointing at the current log file.
const CURRENT_LOG_NAME: &str = "boardlink.log";

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Local wall-clock prefix used by every log line.
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Start mirroring log lines into a timestamped file under `log_dir`.
/// Returns the path of the file that was opened.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-boardlink.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    // Windows symlinks need elevated privileges, so only Unix gets the stable name
    #[cfg(unix)]
    {
        let symlink_path = log_dir.join(CURRENT_LOG_NAME);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create {} symlink: {}",
                timestamp(),
                CURRENT_LOG_NAME,
                e
            );
        }
    }

    match LOG_FILE.lock() {
        Ok(mut guard) => *guard = Some(file),
        Err(poisoned) => *poisoned.into_inner() = Some(file),
    }

    // tlog! would lock LOG_FILE again, so write this one directly
    eprintln!("{} [logging] File logging started: {}", timestamp(), log_path.display());

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() {
            eprintln!("{} [logging] File logging stopped", timestamp());
        }
    }
}

/// Whether log lines are currently mirrored to a file.
pub fn file_logging_active() -> bool {
    LOG_FILE.lock().map(|g| g.is_some()).unwrap_or(false)
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", $crate::logging::timestamp(), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        // HH:MM:SS.mmm
        assert_eq!(ts.len(), 12);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[5..6], ":");
        assert_eq!(&ts[8..9], ".");
    }

    #[test]
    fn test_file_logging_writes_lines() {
        let dir = std::env::temp_dir().join(format!(
            "boardlink-log-test-{}-{}",
            std::process::id(),
            chrono::Local::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let path = init_file_logging(&dir).expect("init logging");
        assert!(file_logging_active());
        crate::tlog!("[test] hello {}", 42);
        stop_file_logging();
        assert!(!file_logging_active());

        let content = std::fs::read_to_string(&path).expect("read log");
        assert!(content.contains("[test] hello 42"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
