//! Logging setup.
//!
//! This module provides the log sink for the loop:
//! - Writes timestamped events to stderr
//! - Optionally appends the same events to a log file
//! - Supports configurable log levels via `RUST_LOG` or `-v` flags

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Disable logging entirely
    Off,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// Convert verbosity count to log level.
    /// 0 = Info, 1 = Debug, 2+ = Trace
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Configuration for the log sink.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Whether to include the target (module path)
    pub with_target: bool,
    /// Append-only log file, in addition to stderr
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Create a configuration from verbosity level (0 = info, 1 = debug, 2+ = trace).
    pub fn from_verbosity(verbosity: u8) -> Self {
        Self::default().with_level(LogLevel::from(verbosity))
    }

    fn env_filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(self.level.directive())
        }
    }
}

/// Initialize the global subscriber.
///
/// Call once at startup. Fails if the log file cannot be opened or a
/// subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use pairloop::logging::{init_logging, LoggingConfig, LogLevel};
///
/// init_logging(LoggingConfig::new().with_level(LogLevel::Debug)).unwrap();
/// ```
pub fn init_logging(config: LoggingConfig) -> io::Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(config.with_target);

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(config.with_target)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))
}
