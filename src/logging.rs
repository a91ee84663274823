//! `tracing` subscriber setup shared by the binaries.

use crate::config::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to open log file {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("A global logger is already installed")]
    AlreadyInstalled,
}

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Raise `base` by `verbose` steps (`-v` → debug, `-vv` → trace).
pub fn effective_level(base: &str, verbose: u8) -> String {
    let base = base.trim().to_ascii_lowercase();
    match LEVELS.iter().position(|l| *l == base) {
        Some(i) => LEVELS[(i + usize::from(verbose)).min(LEVELS.len() - 1)].to_string(),
        // Not a plain level: a filter directive, used as given
        None => base,
    }
}

fn filter_for(config: &LoggingConfig, verbose: u8) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let filter = effective_level(&config.level, verbose);
    EnvFilter::try_new(&filter).map_err(|source| LoggingError::Filter { filter, source })
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level. Output goes to `config.file` if set, else stderr.
pub fn init(config: &LoggingConfig, verbose: u8) -> Result<(), LoggingError> {
    let filter = filter_for(config, verbose)?;

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer = match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_line_number(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_target(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)
}
