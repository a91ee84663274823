//! Hardware test utilities for ESP devices.
//!
//! This library backs the `esp-*` command-line tools and can be used directly
//! from test code.
//!
//! # Modules
//!
//! - `port`: byte transports (serial, telnet/TCP, mock) and the port lease registry
//! - `discovery`: USB serial port enumeration and name resolution
//! - `dut`: device-under-test sessions with `expect`, reset and log capture
//! - `control`: RF attenuators and managed switches
//! - `tools`: esptool download, build directory parsing, copy, pip and chip checks
//! - `config`: TOML configuration with environment overrides
//! - `logging`: `tracing` subscriber setup
//! - `error`: top-level error for the binaries
//! - `cli`: flags and startup shared by the binaries
//!
//! # Example
//!
//! ```rust,no_run
//! use esptest::dut::{Dut, SerialDut};
//! use esptest::port::PortConfiguration;
//! use std::time::Duration;
//!
//! let mut dut = SerialDut::serial("/dev/ttyUSB0", PortConfiguration::with_baud(115200)).opened()?;
//! dut.reset()?;
//! dut.expect_exact("main_task: Calling app_main()", Duration::from_secs(10))?;
//! dut.close();
//! # Ok::<(), esptest::dut::DutError>(())
//! ```

pub mod cli;
pub mod config;
pub mod control;
pub mod discovery;
pub mod dut;
pub mod error;
pub mod logging;
pub mod port;
pub mod tools;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use control::{AttenuatorControl, DeviceCommandError, SwitchControl, SwitchTarget};
pub use discovery::{compute_serial_port, list_ports, DiscoveryError, PortFilter, PortInfo};
pub use dut::{Dut, DutError, ExpectMatch, Pattern, SerialDut};
pub use error::{AppError, AppResult};
pub use port::{
    MockSerialPort, PortConfiguration, PortError, PortLease, SerialPortAdapter, SyncSerialPort,
    TcpPort,
};
pub use tools::ToolError;
