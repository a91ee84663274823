//! Top-level error for the esptest binaries.

use crate::config::ConfigError;
use crate::control::DeviceCommandError;
use crate::discovery::DiscoveryError;
use crate::dut::DutError;
use crate::logging::LoggingError;
use crate::port::PortError;
use crate::tools::ToolError;
use std::process::ExitCode;
use thiserror::Error;

/// Any failure a binary can report.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Dut(#[from] DutError),

    #[error(transparent)]
    Device(#[from] DeviceCommandError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Bad command-line input not caught by the parser.
    #[error("{0}")]
    Usage(String),

    /// The tool ran but its check failed; details were already logged.
    #[error("{0}")]
    Failed(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

/// Log the error of a binary's `run` and turn the outcome into an exit code.
pub fn report(result: AppResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                tracing::error!("{e}");
            } else {
                eprintln!("error: {e}");
            }
            e.exit_code()
        }
    }
}
