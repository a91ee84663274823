//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "ESPTEST";

/// Config file name
const CONFIG_FILE_NAME: &str = "esptest.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "ESPTEST_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `ESPTEST_CONFIG` environment variable (explicit path)
    /// 2. `./esptest.toml` (current directory)
    /// 3. `esptest.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// `--config` if given, otherwise the standard resolution.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write the current configuration to `path`, creating directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = toml::to_string_pretty(&self.config)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|p| p.exists())
}

/// Platform config directory for esptest (`~/.config/esptest` on Linux).
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "esptest").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default config file path inside [`get_default_config_dir`].
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// `ESPTEST_<key>`, falling back to a legacy variable name.
fn env_value(key: &str, legacy: Option<&str>) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(val) = std::env::var(&var) {
        return Some((var, val));
    }
    let legacy = legacy?;
    std::env::var(legacy).ok().map(|val| (legacy.to_string(), val))
}

fn parse_env<T: FromStr>(var: &str, val: &str, what: &str) -> ConfigResult<T> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(var, format!("Invalid {what}: {val}")))
}

/// Apply environment variable overrides to the configuration.
///
/// Variables follow `ESPTEST_<SECTION>_<KEY>`, e.g. `ESPTEST_SERIAL_BAUD=921600`
/// or `ESPTEST_DOWNLOAD_BAUDS=921600,115200`. `ESPPORT` and `ESPBAUD` are
/// honoured for the serial section.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial
    if let Some((_, val)) = env_value("SERIAL_PORT", Some("ESPPORT")) {
        config.serial.port = Some(val);
    }
    if let Some((var, val)) = env_value("SERIAL_BAUD", Some("ESPBAUD")) {
        config.serial.baud = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_value("SERIAL_READ_INTERVAL_MS", None) {
        config.serial.read_interval_ms = parse_env(&var, &val, "interval")?;
    }

    // DUT
    if let Some((var, val)) = env_value("DUT_EXPECT_TIMEOUT_MS", None) {
        config.dut.expect_timeout_ms = parse_env(&var, &val, "timeout")?;
    }
    if let Some((_, val)) = env_value("DUT_LOG_DIR", None) {
        config.dut.log_dir = Some(PathBuf::from(val));
    }

    // Attenuator
    if let Some((_, val)) = env_value("ATTENUATOR_DEVICE", None) {
        config.attenuator.device = Some(val);
    }
    if let Some((var, val)) = env_value("ATTENUATOR_TYPE", None) {
        config.attenuator.att_type = Some(parse_env(&var, &val, "attenuator type")?);
    }
    if let Some((var, val)) = env_value("ATTENUATOR_READ_DELAY_MS", None) {
        config.attenuator.read_delay_ms = parse_env(&var, &val, "delay")?;
    }

    // Switch
    if let Some((_, val)) = env_value("SWITCH_ADDRESS", None) {
        config.switch.address = Some(val);
    }
    if let Some((_, val)) = env_value("SWITCH_USERNAME", None) {
        config.switch.username = val;
    }
    if let Some((_, val)) = env_value("SWITCH_PASSWORD", None) {
        config.switch.password = val;
    }

    // Download
    if let Some((_, val)) = env_value("DOWNLOAD_ESPTOOL", None) {
        config.download.esptool = val;
    }
    if let Some((var, val)) = env_value("DOWNLOAD_BAUDS", None) {
        config.download.bauds = val
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_env(&var, s, "baud rate"))
            .collect::<ConfigResult<_>>()?;
    }

    // Logging
    if let Some((_, val)) = env_value("LOGGING_LEVEL", None) {
        config.logging.level = val;
    }
    if let Some((var, val)) = env_value("LOGGING_FORMAT", None) {
        config.logging.format = match val.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env_parse(var, format!("Unknown format: {val}"))),
        };
    }

    Ok(())
}
