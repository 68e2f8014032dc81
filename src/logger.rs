//! Structured logging.
//!
//! Events go to the terminal and to a daily rotating file under `paths.log_directory`,
//! in JSON or line format. `RUST_LOG` overrides the configured level.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

use crate::config::AppConfig;

const LOG_FILE_PREFIX: &str = "booru_imagelist.log";

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type LoggerResult<T> = Result<T, LoggerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Line,
}

impl LogFormat {
    pub fn parse(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Line
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer alive. Dropping it flushes pending log lines.
pub struct Logger {
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Installs the global subscriber. Fails if one is already installed.
    pub fn init(config: &AppConfig) -> LoggerResult<Self> {
        let logging = &config.logging;
        let format = LogFormat::parse(&logging.log_format);
        let filter = build_filter(&logging.log_level)?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;
        let mut log_dir = None;

        if logging.log_to_file {
            let dir = PathBuf::from(&config.paths.log_directory);
            std::fs::create_dir_all(&dir)?;
            let (layer, file_guard) = file_layer(&dir, format);
            layers.push(layer);
            guard = Some(file_guard);
            log_dir = Some(dir);
        }
        if logging.log_to_terminal {
            layers.push(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact()
                    .boxed(),
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        info!(
            log_format = %logging.log_format,
            log_level = %logging.log_level,
            "Logger initialized"
        );

        Ok(Self {
            log_dir,
            _guard: guard,
        })
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

fn build_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Filter(e.to_string()))
}

fn file_layer(dir: &Path, format: LogFormat) -> (BoxedLayer, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Line => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };
    (layer, guard)
}
