//! Shared test utilities for the esptest integration tests.
//!
//! - Mock DUTs backed by [`MockSerialPort`]
//! - A fixed OS port table for discovery
//! - A scripted command runner for the esptool wrappers
//! - ESP-IDF build directory fixtures

#![allow(dead_code)]

use esptest::discovery::{DiscoveryError, PortEnumerator, PortInfo};
use esptest::dut::SerialDut;
use esptest::port::MockSerialPort;
use esptest::tools::{CommandOutput, CommandRunner, ToolError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

/// A closed DUT over a fresh mock port, plus a handle to drive the device side.
pub fn mock_dut(name: &str) -> (SerialDut<MockSerialPort>, MockSerialPort) {
    let device = MockSerialPort::new(name);
    let handle = device.clone();
    let dut = SerialDut::new(name, Box::new(move || Ok(handle.clone())));
    (dut, device)
}

/// A USB serial port record.
pub fn usb_port(device: &str, location: &str, vid: u16, pid: u16) -> PortInfo {
    PortInfo {
        device: device.to_string(),
        location: location.to_string(),
        description: "USB serial device".to_string(),
        vid,
        pid,
        manufacturer: None,
        serial_number: None,
    }
}

/// Port table returned as-is by `enumerate`.
pub struct FixedPorts(pub Vec<PortInfo>);

impl PortEnumerator for FixedPorts {
    fn enumerate(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Returns queued outputs in order and records every argv.
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: RefCell<VecDeque<CommandOutput>>,
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, code: i32, stdout: &str) -> Self {
        self.outputs.borrow_mut().push_back(CommandOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput, ToolError> {
        self.calls.borrow_mut().push(argv.to_vec());
        Ok(self.outputs.borrow_mut().pop_front().unwrap_or(CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "no scripted output left\n".to_string(),
        }))
    }
}

pub const FLASHER_ARGS: &str = r#"{
    "write_flash_args" : [ "--flash_mode", "dio", "--flash_size", "4MB", "--flash_freq", "80m" ],
    "flash_files" : {
        "0x0" : "bootloader/bootloader.bin",
        "0x10000" : "hello_world.bin",
        "0x8000" : "partition_table/partition-table.bin"
    },
    "extra_esptool_args" : { "after" : "hard_reset", "before" : "default_reset", "stub" : true, "chip" : "esp32s3" }
}"#;

pub const PARTITION_TABLE: &str = "\
# ESP-IDF Partition Table
# Name, Type, SubType, Offset, Size, Flags
nvs,data,nvs,0x9000,0x6000,
phy_init,data,phy,0xf000,0x1000,
factory,app,factory,0x10000,1M,
";

/// Populate `dir` like an `idf.py build` output directory.
pub fn write_build_dir(dir: &Path) {
    let files: [(&str, &str); 9] = [
        ("flasher_args.json", FLASHER_ARGS),
        ("partition_table/partition-table.csv", PARTITION_TABLE),
        ("partition_table/partition-table.bin", "pt"),
        ("bootloader/bootloader.bin", "bl"),
        ("bootloader/bootloader.elf", "bl-elf"),
        ("hello_world.bin", "app"),
        ("hello_world.elf", "app-elf"),
        ("sdkconfig", "CONFIG_IDF_TARGET=\"esp32s3\"\nCONFIG_ESP_CONSOLE_UART_BAUDRATE=115200\n"),
        ("CMakeFiles/CMakeOutput.log", "cmake"),
    ];
    for (relative, content) in files {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}
