//! Logging initialization for the dashboard client.
//!
//! Logs go to stderr in a compact human format. When JSON output is requested
//! (`DASHBOARD_LOG_FORMAT=json`) and a log file is configured, structured JSONL
//! is also appended to that file.

use crate::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for the log file layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact stderr output only.
    #[default]
    Compact,
    /// Compact stderr output plus JSONL to the log file.
    Json,
}

impl LogFormat {
    /// Read the format from `DASHBOARD_LOG_FORMAT`.
    pub fn from_env() -> Self {
        std::env::var("DASHBOARD_LOG_FORMAT")
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Options for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
    /// JSONL destination. Required for JSON output.
    pub log_file: Option<PathBuf>,
}

impl LogOptions {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::from_env(),
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    fn json_destination(&self) -> Option<&Path> {
        match (self.format, self.log_file.as_deref()) {
            (LogFormat::Json, Some(path)) => Some(path),
            _ => None,
        }
    }
}

/// Appending, line-flushed writer shared by every log event.
#[derive(Clone)]
struct FileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl FileWriter {
    fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(parse_level(level).as_str()))
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed or the log file cannot be opened.
pub fn init_logging(options: &LogOptions) -> CoreResult<()> {
    let json_layer = match options.json_destination() {
        Some(path) => {
            let writer = FileWriter::open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer)
                    .with_filter(env_filter(&options.level)),
            )
        }
        None => None,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_writer(io::stderr)
        .with_filter(env_filter(&options.level));

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| CoreError::Config(format!("failed to install log subscriber: {e}")))?;

    if let Some(path) = options.json_destination() {
        tracing::debug!(log_path = %path.display(), "structured logging enabled");
    }

    Ok(())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
