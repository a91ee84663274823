//! ESP-IDF build directory parsing.

use super::ToolError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const FLASHER_ARGS_FILE: &str = "flasher_args.json";
const PARTITION_CSV: &str = "partition_table/partition-table.csv";

/// `flasher_args.json` as written by `idf.py build`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlasherArgs {
    #[serde(default)]
    pub write_flash_args: Vec<String>,
    /// offset -> file relative to the build directory
    #[serde(default)]
    pub flash_files: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_esptool_args: ExtraEsptoolArgs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtraEsptoolArgs {
    pub before: String,
    pub after: String,
    pub stub: bool,
    pub chip: String,
}

impl Default for ExtraEsptoolArgs {
    fn default() -> Self {
        Self {
            before: "default_reset".to_string(),
            after: "hard_reset".to_string(),
            stub: false,
            chip: "auto".to_string(),
        }
    }
}

/// A row of `partition-table.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub name: String,
    pub kind: String,
    pub subtype: String,
    /// As written in the table, e.g. `0x9000`
    pub offset: String,
    pub size: u64,
    pub flags: String,
}

/// Parse a partition size: `24K`, `2M`, `0x6000` or decimal bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(k) = text.strip_suffix(['K', 'k']) {
        k.trim().parse::<u64>().ok().map(|v| v * 1024)
    } else if let Some(m) = text.strip_suffix(['M', 'm']) {
        m.trim().parse::<u64>().ok().map(|v| v * 1024 * 1024)
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Parse partition table CSV content. Comment lines and lines without
/// exactly six columns are skipped.
pub fn parse_partitions_csv(content: &str) -> Result<Vec<PartitionInfo>, ToolError> {
    let mut partitions = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let sections: Vec<&str> = line.split(',').map(str::trim).collect();
        if sections.len() != 6 {
            continue;
        }
        let size = parse_size(sections[4])
            .ok_or_else(|| ToolError::parse("partition size", sections[4]))?;
        partitions.push(PartitionInfo {
            name: sections[0].to_string(),
            kind: sections[1].to_string(),
            subtype: sections[2].to_string(),
            offset: sections[3].to_string(),
            size,
            flags: sections[5].to_string(),
        });
    }
    Ok(partitions)
}

/// Key/value view of `sdkconfig` or `config/sdkconfig.json`, keys without
/// the `CONFIG_` prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SdkConfig {
    values: BTreeMap<String, Value>,
}

impl SdkConfig {
    /// Load a JSON file by `.json` extension, Kconfig text otherwise.
    pub fn from_file(path: &Path) -> Result<Self, ToolError> {
        let content = std::fs::read_to_string(path).map_err(|e| ToolError::io(path, e))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            let values = serde_json::from_str(&content).map_err(|source| ToolError::Json {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Self { values })
        } else {
            Ok(Self::from_kconfig(&content))
        }
    }

    /// Parse `CONFIG_X=y`, `CONFIG_X="text"`, `CONFIG_X=123` and
    /// `# CONFIG_X is not set` lines.
    pub fn from_kconfig(content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines().map(str::trim) {
            if let Some(unset) = line
                .strip_prefix("# CONFIG_")
                .and_then(|rest| rest.strip_suffix(" is not set"))
            {
                values.insert(unset.to_string(), Value::Bool(false));
                continue;
            }
            let Some((key, raw)) = line.strip_prefix("CONFIG_").and_then(|l| l.split_once('=')) else {
                continue;
            };
            let value = if raw == "y" {
                Value::Bool(true)
            } else if let Some(text) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                Value::String(text.to_string())
            } else if let Ok(n) = raw.parse::<i64>() {
                Value::from(n)
            } else {
                Value::String(raw.to_string())
            };
            values.insert(key.to_string(), value);
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn console_baud(&self) -> Option<u32> {
        ["ESP_CONSOLE_UART_BAUDRATE", "CONSOLE_UART_BAUDRATE"]
            .iter()
            .filter_map(|key| self.get(key))
            .find_map(|v| match v {
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
    }

    pub fn flash_encryption(&self) -> bool {
        matches!(self.get("SECURE_FLASH_ENC_ENABLED"), Some(Value::Bool(true)))
    }
}

/// Console baud rate of the firmware in `dir`, from `sdkconfig` or
/// `config/sdkconfig.json`.
pub fn console_baud(dir: &Path) -> Option<u32> {
    [dir.join("sdkconfig"), dir.join("config").join("sdkconfig.json")]
        .iter()
        .filter(|p| p.is_file())
        .filter_map(|p| match SdkConfig::from_file(p) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!("skipping {}: {e}", p.display());
                None
            }
        })
        .find_map(|config| config.console_baud())
}

/// esptool arguments plus the temporary files they reference. Keep this
/// alive until esptool has finished.
#[derive(Debug)]
pub struct FlashArgs {
    pub args: Vec<String>,
    _blank_nvs: Option<NamedTempFile>,
}

impl FlashArgs {
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// A parsed build directory.
#[derive(Debug, Clone)]
pub struct BinPath {
    dir: PathBuf,
    flasher_args: FlasherArgs,
}

impl BinPath {
    /// Read `flasher_args.json` from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(ToolError::InvalidBinPath(dir));
        }
        let path = dir.join(FLASHER_ARGS_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| ToolError::io(&path, e))?;
        let flasher_args = serde_json::from_str(&content).map_err(|source| ToolError::Json {
            path: path.clone(),
            source,
        })?;
        if !dir.join("partition_table").is_dir() {
            warn!("Can not find partition_table in {}, maybe invalid!", dir.display());
        }
        Ok(Self { dir, flasher_args })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn flasher_args(&self) -> &FlasherArgs {
        &self.flasher_args
    }

    pub fn chip(&self) -> &str {
        &self.flasher_args.extra_esptool_args.chip
    }

    pub fn stub(&self) -> bool {
        self.flasher_args.extra_esptool_args.stub
    }

    pub fn sdkconfig(&self) -> Result<SdkConfig, ToolError> {
        SdkConfig::from_file(&self.dir.join("config").join("sdkconfig.json"))
    }

    pub fn console_baud(&self) -> Option<u32> {
        console_baud(&self.dir)
    }

    pub fn partitions(&self) -> Result<Vec<PartitionInfo>, ToolError> {
        let path = self.dir.join(PARTITION_CSV);
        let content = std::fs::read_to_string(&path).map_err(|e| ToolError::io(&path, e))?;
        parse_partitions_csv(&content)
    }

    /// `offset file` pairs sorted by flash offset.
    pub fn flash_files(&self) -> Vec<(String, PathBuf)> {
        let mut files: Vec<_> = self
            .flasher_args
            .flash_files
            .iter()
            .map(|(offset, file)| (offset.clone(), self.dir.join(file)))
            .collect();
        files.sort_by_key(|(offset, _)| parse_size(offset).unwrap_or(u64::MAX));
        files
    }

    /// Write a 0xFF image the size of the nvs partition.
    fn blank_nvs_image(&self) -> Result<(String, NamedTempFile), ToolError> {
        let nvs = self
            .partitions()?
            .into_iter()
            .find(|p| p.name == "nvs")
            .ok_or_else(|| ToolError::NoNvsPartition(self.dir.clone()))?;
        let mut file = NamedTempFile::new().map_err(|e| ToolError::io(std::env::temp_dir(), e))?;
        let size = usize::try_from(nvs.size).map_err(|_| ToolError::parse("partition size", nvs.size.to_string()))?;
        file.write_all(&vec![0xFF; size])
            .and_then(|()| file.flush())
            .map_err(|e| ToolError::io(file.path(), e))?;
        Ok((nvs.offset, file))
    }

    /// esptool arguments from `--chip` through the last `offset file` pair.
    ///
    /// With `erase_nvs` a blank image is written over the nvs partition;
    /// with `encrypted` the images are written with `--encrypt`.
    pub fn write_flash_args(&self, erase_nvs: bool, encrypted: bool) -> Result<FlashArgs, ToolError> {
        let extra = &self.flasher_args.extra_esptool_args;
        let mut args: Vec<String> = vec![
            "--chip".into(),
            extra.chip.clone(),
            "--before".into(),
            extra.before.clone(),
            "--after".into(),
            extra.after.clone(),
        ];
        if !extra.stub {
            args.push("--no-stub".into());
        }
        args.push("write_flash".into());
        args.extend(self.flasher_args.write_flash_args.iter().cloned());
        if encrypted {
            args.push("--encrypt".into());
        }
        for (offset, file) in self.flash_files() {
            args.push(offset);
            args.push(file.display().to_string());
        }

        let blank_nvs = if erase_nvs {
            let (offset, image) = self.blank_nvs_image()?;
            args.push(offset);
            args.push(image.path().display().to_string());
            Some(image)
        } else {
            None
        };

        Ok(FlashArgs {
            args,
            _blank_nvs: blank_nvs,
        })
    }
}
