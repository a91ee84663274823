//! Build-directory tooling: download command lines, artifact copy, chip
//! detection and pip requirement checks, all with scripted tool output.

use crate::common::{write_build_dir, ScriptedRunner};
use esptest::config::DownloadConfig;
use esptest::tools::{
    check_requirements, copy_bin_to_new_path, detect_chip, pip_list, BinPath, CopyOptions, DownBinTool,
    ToolError,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;

const EFUSE_PLAIN: &str = "SPI_BOOT_CRYPT_CNT (BLOCK0)   Enables flash encryption = Disable (0b000) R/W\n";
const EFUSE_ENCRYPTED: &str = "SPI_BOOT_CRYPT_CNT (BLOCK0)   Enables flash encryption = Enable (0b001) R/W\n";

fn build_dir() -> (tempfile::TempDir, BinPath) {
    let dir = tempfile::tempdir().unwrap();
    write_build_dir(dir.path());
    let bin = BinPath::new(dir.path()).unwrap();
    (dir, bin)
}

fn path_arg(bin: &BinPath, relative: &str) -> String {
    bin.dir().join(relative).display().to_string()
}

#[test]
fn test_build_dir_is_parsed() {
    let (_dir, bin) = build_dir();
    assert_eq!(bin.chip(), "esp32s3");
    assert!(bin.stub());
    assert_eq!(bin.console_baud(), Some(115200));
    let offsets: Vec<String> = bin.flash_files().into_iter().map(|(offset, _)| offset).collect();
    assert_eq!(offsets, vec!["0x0", "0x8000", "0x10000"]);
}

#[test]
fn test_download_falls_back_to_next_baud() {
    let (_dir, bin) = build_dir();
    let runner = ScriptedRunner::new()
        .then(0, EFUSE_PLAIN)
        .then(2, "A fatal error occurred: Failed to connect to ESP32-S3\n")
        .then(0, "Hash of data verified.\n");
    let tool = DownBinTool::new(bin.clone(), "/dev/ttyUSB0", &DownloadConfig::default());

    tool.download(&runner).unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], vec!["espefuse.py", "--port", "/dev/ttyUSB0", "summary"]);

    let mut expected: Vec<String> = [
        "esptool.py", "--no-stub", "-p", "/dev/ttyUSB0", "-b", "921600", "--chip", "esp32s3",
        "--before", "default_reset", "--after", "hard_reset", "write_flash", "--flash_mode", "dio",
        "--flash_size", "4MB", "--flash_freq", "80m", "0x0",
    ]
    .map(String::from)
    .to_vec();
    expected.push(path_arg(&bin, "bootloader/bootloader.bin"));
    expected.push("0x8000".to_string());
    expected.push(path_arg(&bin, "partition_table/partition-table.bin"));
    expected.push("0x10000".to_string());
    expected.push(path_arg(&bin, "hello_world.bin"));
    assert_eq!(calls[1], expected);

    expected[5] = "460800".to_string();
    assert_eq!(calls[2], expected);
}

#[test]
fn test_encrypted_device_gets_encrypt_flag_and_blank_nvs() {
    let (_dir, bin) = build_dir();
    let runner = ScriptedRunner::new().then(0, EFUSE_ENCRYPTED).then(0, "");
    let tool = DownBinTool::new(bin, "/dev/ttyUSB0", &DownloadConfig::default())
        .with_bauds(vec![115200])
        .with_erase_nvs(true)
        .with_force_no_stub(false);

    tool.download(&runner).unwrap();

    let esptool = &runner.calls()[1];
    assert_eq!(esptool[..4].to_vec(), vec!["esptool.py", "-p", "/dev/ttyUSB0", "-b"]);
    let encrypt = esptool.iter().position(|a| a == "--encrypt").unwrap();
    let first_file = esptool.iter().position(|a| a == "0x0").unwrap();
    assert!(encrypt < first_file);
    // Blank nvs image goes last, at the nvs partition offset
    assert_eq!(esptool[esptool.len() - 2], "0x9000");
}

#[test]
fn test_blank_nvs_image_fills_the_partition() {
    let (_dir, bin) = build_dir();
    let flash = bin.write_flash_args(true, false).unwrap();
    let image = PathBuf::from(flash.args().last().unwrap());
    let content = fs::read(&image).unwrap();
    assert_eq!(content.len(), 0x6000);
    assert!(content.iter().all(|&b| b == 0xFF));

    drop(flash);
    assert!(!image.exists());
}

#[test]
fn test_failed_download_collects_every_attempt() {
    let (_dir, bin) = build_dir();
    let config = DownloadConfig {
        check_encryption: false,
        ..Default::default()
    };
    let runner = ScriptedRunner::new()
        .then(2, "Connecting........_____\n")
        .then(2, "Connecting........_____\n");
    let tool = DownBinTool::new(bin, "/dev/ttyUSB4", &config);

    match tool.download(&runner) {
        Err(ToolError::DownloadFailed { port, log }) => {
            assert_eq!(port, "/dev/ttyUSB4");
            assert!(log.contains("Download failed: [/dev/ttyUSB4@921600]"));
            assert!(log.contains("Download failed: [/dev/ttyUSB4@460800]"));
        }
        other => panic!("expected DownloadFailed, got {other:?}"),
    }
    // No espefuse call when the encryption check is off
    assert!(runner.calls().iter().all(|argv| argv[0] == "esptool.py"));
}

#[test]
fn test_efuse_failure_stops_the_download() {
    let (_dir, bin) = build_dir();
    let runner = ScriptedRunner::new().then(2, "A fatal error occurred\n");
    let tool = DownBinTool::new(bin, "/dev/ttyUSB5", &DownloadConfig::default());
    assert!(matches!(
        tool.download(&runner),
        Err(ToolError::CommandFailed { code: 2, .. })
    ));
    assert_eq!(runner.calls().len(), 1);
}

#[test]
fn test_copy_bin_keeps_layout() {
    let (dir, _bin) = build_dir();
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("fw");

    let copied = copy_bin_to_new_path(dir.path(), &dest, &CopyOptions::default()).unwrap();
    let copied: Vec<String> = copied.iter().map(|p| p.to_string_lossy().replace('\\', "/")).collect();
    assert_eq!(
        copied,
        vec![
            "bootloader/bootloader.bin",
            "bootloader/bootloader.elf",
            "flasher_args.json",
            "hello_world.bin",
            "hello_world.elf",
            "partition_table/partition-table.bin",
            "partition_table/partition-table.csv",
            "sdkconfig",
        ]
    );
    assert!(!dest.join("CMakeFiles").exists());

    // The copy is itself a usable build directory
    let copy = BinPath::new(&dest).unwrap();
    assert_eq!(copy.chip(), "esp32s3");
}

#[test]
fn test_copy_bin_options() {
    let (dir, _bin) = build_dir();
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("fw");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("stale.txt"), "old").unwrap();

    let keep = CopyOptions {
        force: false,
        ..Default::default()
    };
    assert!(matches!(
        copy_bin_to_new_path(dir.path(), &dest, &keep),
        Err(ToolError::DestinationExists(_))
    ));

    let lean = CopyOptions {
        copy_elf: false,
        extra_files: vec!["CMakeFiles/*.log".to_string()],
        ..Default::default()
    };
    copy_bin_to_new_path(dir.path(), &dest, &lean).unwrap();
    assert!(!dest.join("stale.txt").exists());
    assert!(!dest.join("hello_world.elf").exists());
    assert!(dest.join("CMakeFiles/CMakeOutput.log").is_file());
}

#[test]
fn test_detect_chip_on_port() {
    let output = "esptool.py v4.7.0\n\
Serial port /dev/ttyUSB0\n\
Chip is ESP32-S3 (QFN56) (revision v0.2)\n\
Crystal is 40MHz\n\
MAC: 68:b6:b3:22:11:00\n\
Detected flash size: 8MB\n";
    let runner = ScriptedRunner::new().then(0, output);
    let esptool = vec!["python".to_string(), "-m".to_string(), "esptool".to_string()];

    let chip = detect_chip(&runner, &esptool, "/dev/ttyUSB0").unwrap().unwrap();
    assert_eq!(chip.name, "ESP32-S3");
    assert_eq!(chip.target, "esp32s3");
    assert_eq!(chip.revision, "v0.2");
    assert_eq!(chip.flash_size, "8MB");
    assert_eq!(
        runner.calls()[0],
        vec!["python", "-m", "esptool", "-p", "/dev/ttyUSB0", "flash_id"]
    );

    // Not an ESP chip: no retry, no result
    let runner = ScriptedRunner::new().then(2, "A fatal error occurred: Failed to connect\n");
    assert_eq!(detect_chip(&runner, &esptool, "/dev/ttyUSB1").unwrap(), None);
    assert_eq!(runner.calls().len(), 1);
}

#[test]
fn test_pip_requirements_against_installed_packages() {
    let runner = ScriptedRunner::new().then(
        0,
        r#"[{"name": "pytest", "version": "7.4.3"}, {"name": "PyYAML", "version": "6.0.1"},
            {"name": "esptool", "version": "4.7.0"}]"#,
    );
    let installed = pip_list(&runner, "python3").unwrap();
    assert_eq!(runner.calls()[0], vec!["python3", "-m", "pip", "list", "--format=json"]);

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.txt"), "pyyaml>=6\nesptool~=4.5\n").unwrap();
    let main = dir.path().join("requirements.txt");
    fs::write(
        &main,
        "# test deps\n-r base.txt\npytest>=8.0\nesptest-extras\n--index-url https://example.org/simple\n",
    )
    .unwrap();

    let problems = check_requirements(&main, &installed).unwrap();
    assert_eq!(
        problems,
        vec![
            "Package 'pytest' version '7.4.3' does not meet the requirement: pytest>=8.0".to_string(),
            "Package 'esptest-extras' is not installed".to_string(),
        ]
    );
}
