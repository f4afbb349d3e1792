//! Logging initialization: stderr or syslog-backed tracing subscriber.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use clap::ValueEnum;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing_subscriber::EnvFilter;

/// Accepted values for `--log-level`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    Info,
    /// Debug detail, including the parsed directive set.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    const fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `--log-level` when set. With
/// `use_syslog` the fmt layer writes each line to the local syslog daemon
/// instead of stderr, which keeps hook output visible when the invoking
/// runtime discards stderr.
///
/// # Errors
///
/// Returns an error if the syslog connection cannot be established.
pub fn init(level: LogLevel, use_syslog: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    if use_syslog {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: "layerkeep".into(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("connecting to syslog: {e}"))?;
        let writer = SyslogWriter::new(logger);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

/// `io::Write` adapter forwarding whole log lines to the syslog daemon.
#[derive(Clone)]
struct SyslogWriter {
    logger: Arc<Mutex<Logger<LoggerBackend, Formatter3164>>>,
}

impl SyslogWriter {
    fn new(logger: Logger<LoggerBackend, Formatter3164>) -> Self {
        Self {
            logger: Arc::new(Mutex::new(logger)),
        }
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let message = String::from_utf8_lossy(buf);
        let message = message.trim_end();
        if !message.is_empty() {
            if let Ok(mut logger) = self.logger.lock() {
                let _ = logger.info(message);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
