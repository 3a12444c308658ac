//! Session logger: one log file per run in the OS data directory.
//!
//! The file is truncated at each launch so it only holds the latest session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\pxtrack\pxtrack.log`
//!   Linux:    `~/.local/share/pxtrack/pxtrack.log`
//!   macOS:    `~/Library/Application Support/pxtrack/pxtrack.log`
//!
//! Use the `log_info!` / `log_warn!` / `log_err!` macros anywhere in the
//! crate.  Before [`init`] runs every macro is a no-op, so library callers
//! and tests need no setup.  Lines below [`min_level`] are dropped.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::{SecondsFormat, Utc};

use crate::error::TrackerError;

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Severity of a log line, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 0,
    Warn = 1,
    Error = 2,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Info,
            1 => Level::Warn,
            _ => Level::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag().to_ascii_lowercase())
    }
}

impl FromStr for Level {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(TrackerError::InvalidFormat(format!("unknown log level `{}`", other))),
        }
    }
}

/// Drop lines below `level` from now on.
pub fn set_min_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn min_level() -> Level {
    Level::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

fn enabled(level: Level) -> bool {
    LOG_FILE.get().is_some() && level >= min_level()
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Write a raw line.  I/O errors are ignored so logging never fails a request.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Write a timestamped, level-tagged line.
pub fn write(level: Level, msg: &str) {
    if enabled(level) {
        write_line(&format!("[{}] [{}] {}", timestamp(), level.tag(), msg));
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*))
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*))
    }};
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {{
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*))
    }};
}

/// Initialise the logger at the default platform location.
pub fn init() {
    init_at(&log_file_path());
}

/// Initialise the logger at `path`.  Only the first call has any effect.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that mirrors panics into the log before running
///   the default handler.
pub fn init_at(path: &Path) {
    if LOG_FILE.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path);

    match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.to_path_buf());
            let _ = LOG_FILE.set(Mutex::new(f));
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    }

    write_line(&format!(
        "=== pxtrack session started {} ===",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("pxtrack").join("pxtrack.log")
}

/// Platform data directory (without the app sub-folder).
pub(crate) fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn timestamp() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_and_order() {
        assert_eq!("WARNING".parse::<Level>().ok(), Some(Level::Warn));
        assert_eq!(" error ".parse::<Level>().ok(), Some(Level::Error));
        assert!("verbose".parse::<Level>().is_err());
        assert!(Level::Info < Level::Warn && Level::Warn < Level::Error);
        assert_eq!(Level::from_u8(Level::Warn as u8), Level::Warn);
        assert_eq!(Level::Error.to_string(), "error");
    }

    #[test]
    fn macros_are_expressions() {
        let failed: std::result::Result<u8, &str> = Err("disk full");
        match failed {
            Ok(_) => {}
            Err(e) => crate::log_warn!("write failed: {}", e),
        }
        let count = if failed.is_err() { 0 } else { 1 };
        let logged = || crate::log_info!("{} records", count);
        logged();
        assert_eq!(count, 0);
    }
}
