//! Lifecycle-managed logging sink.
//!
//! The crate logs through the `log` facade everywhere. Library
//! initialization installs a sink (stderr or a file) at the configured
//! verbosity; finalize detaches it. The global logger registration with
//! the `log` crate happens once per process, while the active sink and
//! level can change across repeated init/finalize cycles.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{QosError, Result};

/// Logging verbosity, from nothing to everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verbosity {
    /// No output at all.
    Silent,
    /// Errors, warnings and informational messages.
    #[default]
    Default,
    /// Adds debug detail.
    Verbose,
    /// Everything, trace included.
    Super,
}

impl Verbosity {
    fn level_filter(self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::Off,
            Self::Default => LevelFilter::Info,
            Self::Verbose => LevelFilter::Debug,
            Self::Super => LevelFilter::Trace,
        }
    }
}

/// Where log output goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSink {
    /// Standard error.
    #[default]
    Stderr,
    /// Append to the named file.
    File(PathBuf),
}

enum ActiveSink {
    Stderr,
    File(File),
}

impl ActiveSink {
    fn open(sink: &LogSink) -> Result<Self> {
        match sink {
            LogSink::Stderr => Ok(Self::Stderr),
            LogSink::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Ok(Self::File(file))
            }
        }
    }

    fn write_line(&mut self, line: &str) {
        match self {
            Self::Stderr => eprintln!("{line}"),
            Self::File(file) => {
                let _ = writeln!(file, "{line}");
            }
        }
    }

    fn flush(&mut self) {
        if let Self::File(file) = self {
            let _ = file.flush();
        }
    }
}

static SINK: Mutex<Option<ActiveSink>> = Mutex::new(None);
static INSTALL: Once = Once::new();
static LOGGER: SinkLogger = SinkLogger;

struct SinkLogger;

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Ok(mut guard) = SINK.lock() else {
            return;
        };
        if let Some(sink) = guard.as_mut() {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            sink.write_line(&format!("{ts} [{}] {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = SINK.lock() {
            if let Some(sink) = guard.as_mut() {
                sink.flush();
            }
        }
    }
}

/// Attach the configured sink and verbosity. Fails when a file sink
/// cannot be opened.
pub(crate) fn start(sink: &LogSink, verbosity: Verbosity) -> Result<()> {
    let active = ActiveSink::open(sink)?;
    let mut guard = SINK
        .lock()
        .map_err(|_| QosError::Failure("log sink mutex poisoned".to_string()))?;
    INSTALL.call_once(|| {
        // Another logger may already be registered by the embedding
        // application; our records then flow through that one instead.
        let _ = log::set_logger(&LOGGER);
    });
    log::set_max_level(verbosity.level_filter());
    *guard = Some(active);
    Ok(())
}

/// Flush and detach the active sink.
pub(crate) fn stop() -> Result<()> {
    let mut guard = SINK
        .lock()
        .map_err(|_| QosError::Failure("log sink mutex poisoned".to_string()))?;
    if let Some(mut sink) = guard.take() {
        sink.flush();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(Verbosity::Silent.level_filter(), LevelFilter::Off);
        assert_eq!(Verbosity::Default.level_filter(), LevelFilter::Info);
        assert_eq!(Verbosity::Verbose.level_filter(), LevelFilter::Debug);
        assert_eq!(Verbosity::Super.level_filter(), LevelFilter::Trace);
    }

    #[test]
    fn test_file_sink_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdtctl.log");
        let mut sink = ActiveSink::open(&LogSink::File(path.clone())).unwrap();
        sink.write_line("hello from the sink");
        sink.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello from the sink"));
    }

    #[test]
    fn test_file_sink_open_failure() {
        let err = ActiveSink::open(&LogSink::File(PathBuf::from(
            "/nonexistent-dir/rdtctl.log",
        )))
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(err, QosError::Io(_)));
    }

    #[test]
    fn test_start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycle.log");
        start(&LogSink::File(path.clone()), Verbosity::Verbose).unwrap();
        stop().unwrap();
        // Restart with a fresh sink works.
        start(&LogSink::File(path), Verbosity::Default).unwrap();
        stop().unwrap();
    }

    #[test]
    fn test_sink_serialization() {
        let sink = LogSink::File(PathBuf::from("/tmp/x.log"));
        let json = serde_json::to_string(&sink).unwrap();
        let back: LogSink = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sink);
    }
}
