//! Arguments and startup shared by the `esp-*` binaries.

use crate::config::{Config, ConfigLoader};
use crate::error::AppResult;
use clap::{ArgAction, Args};
use std::path::PathBuf;
use tracing::debug;

/// Flags every tool accepts.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (default: ESPTEST_CONFIG, ./esptest.toml, user config dir)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

impl CommonArgs {
    /// Load the configuration and install logging.
    pub fn init(&self) -> AppResult<Config> {
        let loader = ConfigLoader::load_or_default(self.config.as_deref())?;
        crate::logging::init(&loader.config().logging, self.verbose)?;
        match &loader.config_path {
            Some(path) => debug!("loaded configuration from {}", path.display()),
            None => debug!("using built-in configuration"),
        }
        Ok(loader.into_config())
    }
}

/// Parse a `start-end` range of `ttyUSB` indices into device names.
pub fn port_range(range: &str) -> Option<Vec<String>> {
    let (start, end) = range.trim().split_once('-')?;
    let (start, end): (u32, u32) = (start.trim().parse().ok()?, end.trim().parse().ok()?);
    (start <= end).then(|| (start..=end).map(|i| format!("ttyUSB{i}")).collect())
}
