//! Wrappers around the ESP-IDF host tools and build output.
//!
//! External programs (esptool, espefuse, pip) run through [`CommandRunner`]
//! so the parsing and retry logic can be exercised with canned output.

pub mod bin_path;
pub mod chip_detect;
pub mod copy_bin;
pub mod download;
pub mod pip_check;

pub use bin_path::{console_baud, BinPath, FlashArgs, FlasherArgs, PartitionInfo, SdkConfig};
pub use chip_detect::{chip_name_to_target, detect_chip, parse_flash_id_output, ChipInfo};
pub use copy_bin::{copy_bin_to_new_path, CopyOptions};
pub use download::{check_flash_encrypted, filter_esptool_log, DownBinTool};
pub use pip_check::{check_requirements, pip_list, Requirement, Version};

use crate::discovery::DiscoveryError;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Tool invocation and build-directory errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {code}:\n{output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("Not a build directory: {0}")]
    InvalidBinPath(PathBuf),

    #[error("No nvs partition in {0}")]
    NoNvsPartition(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Failed to download bin to {port}")]
    DownloadFailed { port: String, log: String },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl ToolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            what,
            detail: detail.into(),
        }
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs an external program to completion.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run `argv[0]` with the remaining arguments. A non-zero exit is
    /// reported in the output, not as an error.
    fn run(&self, argv: &[String]) -> Result<CommandOutput, ToolError>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput, ToolError> {
        let command = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| ToolError::Spawn {
            command: command.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        debug!(%command, "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ToolError::Spawn { command, source })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Split a configured command such as `python -m esptool` into argv.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
