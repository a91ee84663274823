//! Tests against a real ESP board.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0          # or COM3 on Windows
//! export TEST_BAUD=115200                # optional, console baud rate
//! export TEST_BIN_PATH=build             # optional, for the download test
//!
//! cargo test --features hardware-tests -- --ignored
//! ```
//!
//! The board should run firmware that prints a boot log after reset.

use crate::hardware::utils::skip_without_hardware;
use esptest::config::DownloadConfig;
use esptest::dut::{Dut, DutError, Pattern, SerialDut};
use esptest::tools::{detect_chip, split_command, BinPath, DownBinTool, SystemRunner};
use std::time::{Duration, Instant};

#[test]
#[ignore] // Run with --ignored flag
fn test_real_dut_open_close() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let mut dut = SerialDut::serial(&hw.port_name, hw.to_port_config());
    dut.open().expect("Failed to open DUT");
    assert!(dut.is_open());

    // Same process, same port: refused
    let mut second = SerialDut::serial(&hw.port_name, hw.to_port_config());
    assert!(matches!(second.open(), Err(DutError::PortBusy(_))));

    dut.close();
    dut.close();
    assert!(!dut.is_open());
    println!("✅ Open/close on {}", hw.port_name);
}

#[test]
#[ignore]
fn test_real_dut_boot_log_after_reset() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let mut dut = SerialDut::serial(&hw.port_name, hw.to_port_config())
        .opened()
        .expect("Failed to open DUT");
    dut.reset().expect("Failed to reset");

    let boot = Pattern::regex(r"rst:0x[0-9a-f]+ \((\w+)\)").unwrap();
    let found = dut
        .expect(&boot, Duration::from_secs(5))
        .expect("No boot log after reset");
    println!("✅ Reset reason: {}", found.group_str(1).unwrap_or_default());
}

#[test]
#[ignore]
fn test_real_dut_expect_timeout_is_bounded() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let mut dut = SerialDut::serial(&hw.port_name, hw.to_port_config())
        .opened()
        .expect("Failed to open DUT");

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let err = dut
        .expect_exact("this text is never printed by any firmware", timeout)
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(250), "took {elapsed:?}");
}

#[test]
#[ignore]
fn test_real_chip_detection() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let esptool = split_command(&DownloadConfig::default().esptool);
    let chip = detect_chip(&SystemRunner, &esptool, &hw.port_name)
        .expect("Failed to run esptool")
        .expect("No ESP chip detected");
    assert_ne!(chip.target, "unknown");
    println!("✅ {} ({}) rev {}", chip.name, chip.target, chip.revision);
}

#[test]
#[ignore]
fn test_real_download() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };
    let Some(bin_path) = hw.bin_path.as_deref() else {
        println!("⏭️  Skipping download test: TEST_BIN_PATH not set");
        return;
    };

    let bin = BinPath::new(bin_path).expect("Invalid build directory");
    let tool = DownBinTool::new(bin, hw.port_name.clone(), &DownloadConfig::default());
    tool.download(&SystemRunner).expect("Download failed");
    println!("✅ Downloaded {bin_path} to {}", hw.port_name);
}
