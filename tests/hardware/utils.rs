//! Utility functions for hardware testing.
//!
//! Reads the board under test from the environment and prints what the host
//! can see when a test has to be skipped.

use esptest::discovery::{list_ports, PortInfo};
use esptest::port::PortConfiguration;
use std::env;
use std::time::Duration;

/// Board under test, from environment variables.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// Build directory flashed by the download test, if any.
    pub bin_path: Option<String>,
}

impl TestPortConfig {
    /// `TEST_PORT` (required), `TEST_BAUD` (default 115200) and
    /// `TEST_BIN_PATH`.
    pub fn from_env() -> Option<Self> {
        let port_name = env::var("TEST_PORT").ok()?;
        let baud_rate = env::var("TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(115200);
        let bin_path = env::var("TEST_BIN_PATH").ok();

        Some(TestPortConfig {
            port_name,
            baud_rate,
            bin_path,
        })
    }

    pub fn to_port_config(&self) -> PortConfiguration {
        PortConfiguration {
            timeout: Duration::from_millis(100),
            ..PortConfiguration::with_baud(self.baud_rate)
        }
    }
}

/// Skip test if hardware is not available.
pub fn skip_without_hardware() -> Option<TestPortConfig> {
    let config = TestPortConfig::from_env();
    if config.is_none() {
        println!("⏭️  Skipping hardware test: TEST_PORT not set");
        print_available_ports();
    }
    config
}

/// USB serial ports on this host, empty if enumeration fails.
pub fn discover_usb_ports() -> Vec<PortInfo> {
    list_ports(None).unwrap_or_default()
}

/// Print available ports for debugging.
pub fn print_available_ports() {
    let ports = discover_usb_ports();
    if ports.is_empty() {
        println!("No USB serial ports detected on this system");
        return;
    }

    println!("Available USB serial ports ({}):", ports.len());
    for (idx, port) in ports.iter().enumerate() {
        println!(
            "  {}. {} [{}] {} ({})",
            idx + 1,
            port.device,
            port.location,
            port.hwid(),
            port.description
        );
    }
}
