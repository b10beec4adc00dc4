//! Session log for compositing runs.
//!
//! One file per session, truncated when the logger starts:
//!   Windows:  `%APPDATA%\PaintFE\paintfe-projection.log`
//!   Linux:    `~/.local/share/PaintFE/paintfe-projection.log`
//!   macOS:    `~/Library/Application Support/PaintFE/paintfe-projection.log`
//!
//! Nothing is written until [`init`] / [`init_at`] opens the file or
//! [`set_echo`] turns on stderr mirroring, so library users and tests never
//! touch the filesystem. The `log_info!` / `log_warn!` / `log_err!` macros
//! skip formatting entirely while logging is off.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

struct Sink {
    file: Mutex<File>,
    path: PathBuf,
}

static SINK: OnceLock<Sink> = OnceLock::new();
/// Mirror warnings and errors to stderr (the CLI's `--verbose`).
static ECHO: AtomicBool = AtomicBool::new(false);

/// Path of the open session log, if any.
pub fn log_path() -> Option<&'static Path> {
    SINK.get().map(|s| s.path.as_path())
}

pub fn is_enabled() -> bool {
    SINK.get().is_some() || ECHO.load(Ordering::Relaxed)
}

pub fn set_echo(on: bool) {
    ECHO.store(on, Ordering::Relaxed);
}

/// Append one raw line to the file. I/O errors are swallowed; a full disk
/// must not fail a composite.
fn append(line: &str) {
    if let Some(sink) = SINK.get()
        && let Ok(mut file) = sink.file.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

pub fn write(level: Level, msg: &str) {
    if !is_enabled() {
        return;
    }
    let line = format!("[{}] [{}] {}", clock(), level.tag(), msg);
    if level >= Level::Warn && ECHO.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
    append(&line);
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::logger::is_enabled() {
            $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::logger::is_enabled() {
            $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        if $crate::logger::is_enabled() {
            $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*));
        }
    };
}

/// Open the session log at the default location.
pub fn init() {
    init_at(&default_path());
}

/// Open (truncate) the session log at `path`. Later calls are ignored.
/// A panic hook copies panic messages into the log before the default
/// handler runs.
pub fn init_at(path: &Path) {
    if SINK.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let _ = SINK.set(Sink { file: Mutex::new(file), path: path.to_path_buf() });

    append(&format!(
        "=== paintfe-projection {} session, unix {} ===",
        env!("CARGO_PKG_VERSION"),
        unix_secs().unwrap_or(0)
    ));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        append(&format!("[{}] [PANIC] {}", clock(), info));
        prev(info);
    }));
}

fn default_path() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA").map(PathBuf::from).ok()
    } else if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
            .ok()
    } else {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local").join("share")))
            .ok()
    };
    base.unwrap_or_else(|| PathBuf::from("."))
        .join("PaintFE")
        .join("paintfe-projection.log")
}

fn unix_secs() -> Option<u64> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// UTC time of day with milliseconds; construct passes are short.
fn clock() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs() % 86_400;
            format!(
                "{:02}:{:02}:{:02}.{:03}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                d.subsec_millis()
            )
        }
        Err(_) => "??:??:??.???".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(Level::Error > Level::Warn && Level::Warn > Level::Info);
        assert_eq!(Level::Warn.tag(), "WARN");
    }

    #[test]
    fn clock_shape() {
        let c = clock();
        assert_eq!(c.len(), 12, "clock was {c}");
        assert_eq!(&c[2..3], ":");
        assert_eq!(&c[8..9], ".");
    }
}
