//! Panic reporting for loader threads
//!
//! Worker and loader threads are named, so a panic report says which part of
//! a load died. Reports go through `log` and, when configured, are appended
//! to a file.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Local};

static PANIC_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
pub struct PanicTelemetry {
    pub timestamp: DateTime<Local>,
    pub thread: String,
    pub location: String,
    pub message: String,
    pub backtrace: String,
    pub panic_count: usize,
}

/// Text of a panic payload, for the two payload types `panic!` produces.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic message".to_string()
    }
}

impl PanicTelemetry {
    fn from_panic_info(info: &PanicHookInfo) -> Self {
        let location = match info.location() {
            Some(location) => format!("{}:{}:{}", location.file(), location.line(), location.column()),
            None => "unknown location".to_string(),
        };
        let thread = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();

        Self {
            timestamp: Local::now(),
            thread,
            location,
            message: payload_message(info.payload()),
            backtrace: Backtrace::capture().to_string(),
            panic_count: PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn summary(&self) -> String {
        format!(
            "panic #{} in thread '{}' at {}: {}",
            self.panic_count, self.thread, self.location, self.message
        )
    }

    fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "=== PANIC #{} ===", self.panic_count)?;
        writeln!(file, "Timestamp: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        writeln!(file, "Thread: {}", self.thread)?;
        writeln!(file, "Location: {}", self.location)?;
        writeln!(file, "Message: {}", self.message)?;
        writeln!(file, "Backtrace:\n{}", self.backtrace)?;
        file.flush()
    }
}

/// Install the reporting hook. With `log_path`, reports are also appended to
/// that file.
pub fn install(log_path: Option<PathBuf>) {
    panic::set_hook(Box::new(move |info| {
        let telemetry = PanicTelemetry::from_panic_info(info);
        log::error!("{}", telemetry.summary());
        log::debug!("backtrace:\n{}", telemetry.backtrace);

        if let Some(path) = &log_path {
            if let Err(e) = telemetry.write_to(path) {
                log::error!("Failed to write panic log {}: {}", path.display(), e);
            }
        }
    }));
    log::trace!("panic handler installed");
}

pub fn panic_count() -> usize {
    PANIC_COUNT.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_message() {
        let borrowed: Box<dyn Any + Send> = Box::new("worker exploded");
        assert_eq!(payload_message(&*borrowed), "worker exploded");

        let owned: Box<dyn Any + Send> = Box::new(format!("worker {}", 3));
        assert_eq!(payload_message(&*owned), "worker 3");

        let other: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(payload_message(&*other), "unknown panic message");
    }

    #[test]
    fn test_report_written_to_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("panic.log");
        let telemetry = PanicTelemetry {
            timestamp: Local::now(),
            thread: "stl-worker-2".to_string(),
            location: "worker.rs:42:10".to_string(),
            message: "test panic".to_string(),
            backtrace: "disabled backtrace".to_string(),
            panic_count: 1,
        };

        telemetry.write_to(&path).expect("Failed to write panic log");
        telemetry.write_to(&path).expect("Failed to append panic log");

        let text = std::fs::read_to_string(&path).expect("Failed to read panic log");
        assert_eq!(text.matches("=== PANIC #1 ===").count(), 2);
        assert!(text.contains("Thread: stl-worker-2"));
        assert!(telemetry.summary().contains("'stl-worker-2' at worker.rs:42:10"));
    }
}
