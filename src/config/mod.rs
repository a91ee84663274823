//! Configuration for the esptest tools.
//!
//! TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `--config <path>` on any tool
//! 2. `ESPTEST_CONFIG` environment variable (explicit path)
//! 3. `./esptest.toml` (current directory)
//! 4. `esptest.toml` in the platform config directory
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any supported value can be overridden with `ESPTEST_<SECTION>_<KEY>`:
//! - `ESPTEST_SERIAL_BAUD=921600`
//! - `ESPTEST_ATTENUATOR_DEVICE=1-5.1:1.0`
//! - `ESPTEST_SWITCH_PASSWORD=...`
//!
//! `ESPPORT` and `ESPBAUD` are honoured as well.
//!
//! # Example
//!
//! ```rust,no_run
//! use esptest::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("Default baud: {}", loader.config().serial.baud);
//! # Ok::<(), esptest::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    AttenuatorConfig, Config, DownloadConfig, DutConfig, LogFormat, LoggingConfig, SerialConfig,
    SwitchConfig,
};
