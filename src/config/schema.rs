//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::control::AttType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port defaults
    pub serial: SerialConfig,
    /// DUT expect and log capture
    pub dut: DutConfig,
    /// Attenuator lookup and exchange timing
    pub attenuator: AttenuatorConfig,
    /// Network switch login
    pub switch: SwitchConfig,
    /// esptool / espefuse invocation
    pub download: DownloadConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the tools cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.baud == 0 {
            return Err(ConfigError::validation("serial.baud", "must be greater than 0"));
        }
        if self.serial.read_interval_ms == 0 {
            return Err(ConfigError::validation(
                "serial.read_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.download.bauds.is_empty() || self.download.bauds.contains(&0) {
            return Err(ConfigError::validation(
                "download.bauds",
                "needs at least one non-zero baud rate",
            ));
        }
        if self.switch.interface_prefix.trim().is_empty() {
            return Err(ConfigError::validation(
                "switch.interface_prefix",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Default device (also `ESPPORT`)
    pub port: Option<String>,
    /// Default baud rate (also `ESPBAUD`)
    pub baud: u32,
    /// Poll interval for port reads in milliseconds
    pub read_interval_ms: u64,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115200,
            read_interval_ms: 5,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// DUT configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DutConfig {
    /// Default `expect` timeout in milliseconds
    pub expect_timeout_ms: u64,
    /// Directory for captured port logs; unset logs through tracing
    pub log_dir: Option<PathBuf>,
}

impl Default for DutConfig {
    fn default() -> Self {
        Self {
            expect_timeout_ms: 30_000,
            log_dir: None,
        }
    }
}

impl DutConfig {
    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    /// Log file for the device at `path`, when a log directory is set.
    pub fn log_file_for(&self, path: &str) -> Option<PathBuf> {
        let name = path.rsplit(['/', '\\', ':']).next().unwrap_or(path);
        self.log_dir.as_ref().map(|dir| dir.join(format!("{name}.log")))
    }
}

/// Attenuator configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttenuatorConfig {
    /// Device path, port name, USB location or `host:port`
    pub device: Option<String>,
    /// Vendor, when it cannot be derived from VID/PID
    #[serde(rename = "type", alias = "att_type")]
    pub att_type: Option<AttType>,
    /// Serial baud rate of serial attenuators
    pub baud: u32,
    /// Delay between request and reply read in milliseconds
    pub read_delay_ms: u64,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Compensate the known step error above 33 dB
    pub att_fix: bool,
}

impl Default for AttenuatorConfig {
    fn default() -> Self {
        Self {
            device: None,
            att_type: None,
            baud: 9600,
            read_delay_ms: 500,
            connect_timeout_ms: 3000,
            att_fix: false,
        }
    }
}

impl AttenuatorConfig {
    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Switch configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// `host:port` of the switch's telnet shell
    pub address: Option<String>,
    pub username: String,
    pub password: String,
    /// Interface type prefix, e.g. `GE` for `GE1/0/<index>`
    pub interface_prefix: String,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
    /// Session transcript file
    pub log_file: Option<PathBuf>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            address: None,
            username: "admin".to_string(),
            password: String::new(),
            interface_prefix: "GE".to_string(),
            timeout_ms: 10_000,
            log_file: None,
        }
    }
}

impl SwitchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Download configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// esptool command
    pub esptool: String,
    /// espefuse command
    pub espefuse: String,
    /// Python interpreter used for pip queries
    pub python: String,
    /// Baud rates tried in order until one download succeeds
    pub bauds: Vec<u32>,
    /// Append a blank image over the nvs partition
    pub erase_nvs: bool,
    /// Check flash encryption before downloading
    pub check_encryption: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            esptool: "esptool.py".to_string(),
            espefuse: "espefuse.py".to_string(),
            python: "python".to_string(),
            bauds: vec![921600, 460800],
            erase_nvs: false,
            check_encryption: true,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log file path (optional, stderr otherwise)
    pub file: Option<PathBuf>,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Compact,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    Pretty,
    /// Compact format
    #[default]
    Compact,
}
