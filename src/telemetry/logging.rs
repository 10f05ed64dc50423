//! Logging setup for nodes embedding the scheduler.
//!
//! JSON or pretty output, to stderr or a file, filtered by an `EnvFilter`
//! directive string.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Line format for emitted events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(LogError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directives, e.g. "info" or "keyfetch_core=debug".
    pub level: String,
    /// Append to this file instead of stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: String::from("info"),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },
    #[error("unknown log format: {0}")]
    UnknownFormat(String),
    #[error("cannot open log file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LogError::InvalidFilter {
        directives: config.level.clone(),
        reason: e.to_string(),
    })?;
    let output = LogOutput::open(config.output_path.as_deref())?;

    tracing_subscriber::registry()
        .with(output.layer(config.format))
        .with(filter)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

/// Where formatted events go.
struct LogOutput {
    writer: BoxMakeWriter,
    ansi: bool,
}

impl LogOutput {
    fn open(path: Option<&Path>) -> Result<Self, LogError> {
        let Some(path) = path else {
            return Ok(Self {
                writer: BoxMakeWriter::new(std::io::stderr),
                ansi: true,
            });
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LogError::FileOpen { path: path.to_path_buf(), source })?;
        Ok(Self {
            writer: BoxMakeWriter::new(Mutex::new(file)),
            ansi: false,
        })
    }

    fn layer(self, format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer().with_writer(self.writer).with_ansi(self.ansi);
        match format {
            LogFormat::Json => base.json().with_current_span(true).boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
        }
    }
}
