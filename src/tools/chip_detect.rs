//! ESP chip detection with `esptool flash_id`.

use super::{CommandRunner, ToolError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_DETECT_RETRY: u32 = 4;

struct ChipPatterns {
    name: Regex,
    name_new: Regex,
    xtal: Regex,
    xtal_new: Regex,
    mac: Regex,
    flash: Regex,
}

static PATTERNS: Lazy<ChipPatterns> = Lazy::new(|| {
    let re = |s: &str| Regex::new(s).expect("static regex");
    ChipPatterns {
        name: re(r"Chip is ([\w\- ]+).*\(revision (v[\d.]+)\)"),
        name_new: re(r"Chip type:\s+([\w\- ]+).+\(revision (v[\d.]+)\)"),
        xtal: re(r"Crystal is ([\w\-]+)"),
        xtal_new: re(r"Crystal frequency:\s+([\w\-]+)"),
        mac: re(r"MAC:\s+([a-fA-F0-9:]+)"),
        flash: re(r"Detected flash size: (\d+\w+)"),
    }
});

/// What `esptool flash_id` reports about the attached chip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChipInfo {
    /// e.g. `ESP32-C3`
    pub name: String,
    pub revision: String,
    pub xtal: String,
    pub mac: String,
    pub flash_size: String,
    /// IDF target, e.g. `esp32c3`
    pub target: String,
}

/// IDF target name for an esptool chip name, `unknown` if unrecognised.
pub fn chip_name_to_target(name: &str) -> &'static str {
    // c61 must be tried before c6
    const TARGETS: [(&str, &str); 12] = [
        ("ESP32-S2", "esp32s2"),
        ("ESP32-S3", "esp32s3"),
        ("ESP32-S5", "esp32s5"),
        ("ESP32-S6", "esp32s6"),
        ("ESP32-C2", "esp32c2"),
        ("ESP32-C3", "esp32c3"),
        ("ESP32-C5", "esp32c5"),
        ("ESP32-C61", "esp32c61"),
        ("ESP32-C6", "esp32c6"),
        ("ESP32-P4", "esp32p4"),
        ("ESP32-H2", "esp32h2"),
        ("ESP32-H4", "esp32h4"),
    ];
    let name = name.trim();
    if name == "ESP32" {
        return "esp32";
    }
    TARGETS
        .iter()
        .find(|(chip, _)| *chip == name)
        .map_or("unknown", |(_, target)| *target)
}

/// Parse `esptool flash_id` output from old (`Chip is`) and new
/// (`Chip type:`) esptool versions. `None` if no chip was reported.
pub fn parse_flash_id_output(output: &str) -> Option<ChipInfo> {
    let p = &*PATTERNS;
    let chip = p.name.captures(output).or_else(|| p.name_new.captures(output))?;
    let name = chip[1].trim().to_string();
    let group = |re: &Regex| re.captures(output).map(|c| c[1].to_string());
    Some(ChipInfo {
        target: chip_name_to_target(&name).to_string(),
        revision: chip[2].to_string(),
        xtal: group(&p.xtal).or_else(|| group(&p.xtal_new)).unwrap_or_default(),
        mac: group(&p.mac).unwrap_or_default(),
        flash_size: group(&p.flash).unwrap_or_default(),
        name,
    })
}

/// Run `esptool -p <port> flash_id` and parse the chip. A busy port is
/// retried with a growing delay; a port without an ESP chip gives `None`.
pub fn detect_chip(
    runner: &dyn CommandRunner,
    esptool: &[String],
    port: &str,
) -> Result<Option<ChipInfo>, ToolError> {
    let mut argv = esptool.to_vec();
    argv.extend(["-p".to_string(), port.to_string(), "flash_id".to_string()]);

    for attempt in 0..=MAX_DETECT_RETRY {
        let output = runner.run(&argv)?.combined();
        debug!(port, "{output}");
        if let Some(info) = parse_flash_id_output(&output) {
            return Ok(Some(info));
        }
        if !output.contains("busy") || attempt == MAX_DETECT_RETRY {
            break;
        }
        warn!(port, "port busy, retrying chip detection");
        std::thread::sleep(Duration::from_secs(u64::from(attempt) + 1));
    }
    Ok(None)
}
