//! Firmware download to one port with esptool.

use super::bin_path::BinPath;
use super::{split_command, CommandRunner, ToolError};
use crate::config::DownloadConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use tracing::{error, info};

static FLASH_CRYPT_CNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:FLASH_CRYPT_CNT|SPI_BOOT_CRYPT_CNT).*\(0b([01]+)").expect("static regex")
});

/// Whether an `espefuse summary` shows flash encryption enabled: an odd
/// number of bits set in the crypt counter.
pub fn check_flash_encrypted(efuse_summary: &str) -> bool {
    FLASH_CRYPT_CNT
        .captures(efuse_summary)
        .and_then(|c| c.get(1))
        .is_some_and(|bits| bits.as_str().matches('1').count() % 2 == 1)
}

/// Collapse runs of `Writing at ...` progress lines to their first and last
/// line.
pub fn filter_esptool_log(log: &str) -> String {
    let mut filtered = String::with_capacity(log.len());
    let mut last = "";
    for line in log.split_inclusive('\n') {
        let progress = line.starts_with("Writing at");
        let last_progress = last.starts_with("Writing at");
        if !progress {
            if last_progress {
                filtered.push_str(last);
            }
            filtered.push_str(line);
        } else if !last_progress {
            filtered.push_str(line);
        }
        last = line;
    }
    filtered
}

/// Downloads one build directory to one serial port.
#[derive(Debug, Clone)]
pub struct DownBinTool {
    bin: BinPath,
    port: String,
    bauds: Vec<u32>,
    esptool: Vec<String>,
    espefuse: Vec<String>,
    erase_nvs: bool,
    check_encryption: bool,
    force_no_stub: bool,
}

impl DownBinTool {
    /// `port` must already be a device path.
    pub fn new(bin: BinPath, port: impl Into<String>, config: &DownloadConfig) -> Self {
        Self {
            bin,
            port: port.into(),
            bauds: config.bauds.clone(),
            esptool: split_command(&config.esptool),
            espefuse: split_command(&config.espefuse),
            erase_nvs: config.erase_nvs,
            check_encryption: config.check_encryption,
            force_no_stub: true,
        }
    }

    pub fn with_bauds(mut self, bauds: Vec<u32>) -> Self {
        if !bauds.is_empty() {
            self.bauds = bauds;
        }
        self
    }

    pub fn with_erase_nvs(mut self, erase_nvs: bool) -> Self {
        self.erase_nvs = erase_nvs;
        self
    }

    pub fn with_force_no_stub(mut self, force: bool) -> Self {
        self.force_no_stub = force;
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Run `espefuse summary` on the port and check the crypt counter.
    pub fn flash_encrypted(&self, runner: &dyn CommandRunner) -> Result<bool, ToolError> {
        let mut argv = self.espefuse.clone();
        argv.extend(["--port".to_string(), self.port.clone(), "summary".to_string()]);
        let output = runner.run(&argv)?;
        if !output.success() {
            error!("{}", output.combined());
            return Err(ToolError::CommandFailed {
                command: argv.join(" "),
                code: output.code.unwrap_or(-1),
                output: format!("Failed to get efuse information from {}", self.port),
            });
        }
        Ok(check_flash_encrypted(&output.combined()))
    }

    fn esptool_argv(&self, baud: u32, flash_args: &[String]) -> Vec<String> {
        let mut argv = self.esptool.clone();
        if self.force_no_stub && self.bin.stub() {
            argv.push("--no-stub".into());
        }
        argv.extend(["-p".into(), self.port.clone(), "-b".into(), baud.to_string()]);
        argv.extend(flash_args.iter().cloned());
        argv
    }

    /// Flash the build, trying each baud rate in turn until one succeeds.
    pub fn download(&self, runner: &dyn CommandRunner) -> Result<(), ToolError> {
        let encrypted = self.check_encryption && self.flash_encrypted(runner)?;
        let indicator = if encrypted { " [encrypted]" } else { "" };
        let flash = self.bin.write_flash_args(self.erase_nvs, encrypted)?;

        let mut log = String::new();
        for &baud in &self.bauds {
            let argv = self.esptool_argv(baud, flash.args());
            info!(
                "Downloading {}@{}{}: {}",
                self.port,
                baud,
                indicator,
                self.bin.dir().display()
            );
            let output = runner.run(&argv)?;
            if output.success() {
                return Ok(());
            }
            let code = output.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            let _ = writeln!(log, "esptool cmd failed ({code}): {}", argv.join(" "));
            let _ = writeln!(log, "Download failed: [{}@{}]", self.port, baud);
            let _ = write!(log, "esptool output: {}", filter_esptool_log(&output.combined()));
        }
        error!("{log}");
        Err(ToolError::DownloadFailed {
            port: self.port.clone(),
            log,
        })
    }
}
