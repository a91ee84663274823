//! DUT session behaviour over mock ports: expect deadlines, port exclusivity,
//! close semantics, reset and log capture.

use crate::common::mock_dut;
use esptest::dut::{Dut, DutError, LogTarget, LoggedPort, Pattern, SerialDut, DEFAULT_READ_INTERVAL};
use esptest::port::{MockSerialPort, SerialPortAdapter};
use std::time::{Duration, Instant};

/// Slack allowed on top of an expect timeout.
const EPSILON: Duration = Duration::from_millis(60);

#[test]
fn test_expect_ok_within_deadline() {
    let (dut, mut device) = mock_dut("E2E_DUT_OK");
    let mut dut = dut.opened().unwrap();
    device.enqueue_read_after(b"OK\n", Duration::from_millis(50));

    let started = Instant::now();
    let found = dut.expect(&Pattern::exact("OK"), Duration::from_millis(200)).unwrap();
    assert_eq!(found.matched, b"OK");
    assert!(started.elapsed() < Duration::from_millis(200) + EPSILON);
    // The newline after the match stays buffered
    assert_eq!(dut.buffered(), b"\n");
}

#[test]
fn test_expect_times_out_before_late_output() {
    let (dut, mut device) = mock_dut("E2E_DUT_LATE");
    let mut dut = dut.opened().unwrap();
    device.enqueue_read_after(b"OK\n", Duration::from_millis(50));

    let started = Instant::now();
    let err = dut.expect(&Pattern::exact("OK"), Duration::from_millis(10)).unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_millis(10) + EPSILON, "took {elapsed:?}");

    // Output arriving later is still there for the next expect
    assert!(dut.expect_exact("OK", Duration::from_millis(200)).is_ok());
}

#[test]
fn test_expect_without_any_output_honours_timeout() {
    let (dut, _device) = mock_dut("E2E_DUT_SILENT");
    let mut dut = dut.opened().unwrap();
    for timeout in [Duration::from_millis(0), Duration::from_millis(25), Duration::from_millis(80)] {
        let started = Instant::now();
        let err = dut.expect_exact("never", timeout).unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < timeout + EPSILON);
    }
}

#[test]
fn test_timeout_error_carries_unmatched_tail() {
    let (dut, mut device) = mock_dut("E2E_DUT_TAIL");
    let mut dut = dut.opened().unwrap();
    device.enqueue_read(b"rst:0x1 (POWERON_RESET)\r\nboot: ESP-IDF v5.2");

    match dut.expect_exact("app_main", Duration::from_millis(30)) {
        Err(DutError::Timeout { name, tail, pattern, .. }) => {
            assert_eq!(name, "E2E_DUT_TAIL");
            assert_eq!(pattern, "\"app_main\"");
            assert!(tail.ends_with("ESP-IDF v5.2"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn test_regex_expect_returns_groups_and_preceding_output() {
    let (dut, mut device) = mock_dut("E2E_DUT_REGEX");
    let mut dut = dut.opened().unwrap();
    device.enqueue_read(b"I (312) wifi: connected\r\nI (320) esp_netif: got ip:192.168.4.2\r\n");

    let pattern = Pattern::regex(r"got ip:(\d+\.\d+\.\d+\.\d+)").unwrap();
    let found = dut.expect(&pattern, Duration::from_millis(100)).unwrap();
    assert_eq!(found.group_str(1).as_deref(), Some("192.168.4.2"));
    assert!(found.before.starts_with(b"I (312) wifi: connected"));
}

#[test]
fn test_second_open_is_port_busy() {
    let (first, _device) = mock_dut("E2E_DUT_BUSY");
    let first = first.opened().unwrap();

    let (mut second, _other) = mock_dut("E2E_DUT_BUSY");
    match second.open() {
        Err(DutError::PortBusy(name)) => assert_eq!(name, "E2E_DUT_BUSY"),
        other => panic!("expected PortBusy, got {other:?}"),
    }
    assert!(!second.is_open());

    drop(first);
    second.open().unwrap();
    assert!(second.is_open());
}

#[test]
fn test_close_twice_is_noop() {
    let (dut, _device) = mock_dut("E2E_DUT_CLOSE");
    let mut dut = dut.opened().unwrap();
    dut.close();
    dut.close();
    assert!(!dut.is_open());
    assert!(matches!(dut.write(b"x"), Err(DutError::NotOpen(_))));

    // The lease went with the first close
    dut.open().unwrap();
}

#[test]
fn test_close_after_failed_operation_releases_port() {
    let (dut, mut device) = mock_dut("E2E_DUT_UNPLUG");
    let mut dut = dut.opened().unwrap();
    device.set_disconnected(true);
    assert!(matches!(dut.read(Duration::from_millis(10)), Err(DutError::Port(_))));

    dut.close();
    let (mut again, _d) = mock_dut("E2E_DUT_UNPLUG");
    again.open().unwrap();
}

#[test]
fn test_write_line_and_read() {
    let (dut, mut device) = mock_dut("E2E_DUT_CMD");
    let mut dut = dut.opened().unwrap();
    device.respond_to(b"restart\n", b"Restarting...\r\n");

    dut.write_line("restart").unwrap();
    let out = dut.read(Duration::from_millis(100)).unwrap();
    assert_eq!(out, b"Restarting...\r\n");
    assert_eq!(device.written(), b"restart\n");
    assert!(dut.read(Duration::from_millis(10)).unwrap().is_empty());
}

#[test]
fn test_reset_pulses_en_and_drops_stale_output() {
    let (dut, mut device) = mock_dut("E2E_DUT_RESET");
    let mut dut = dut.opened().unwrap();
    device.enqueue_read(b"stale");
    dut.read(Duration::from_millis(10)).unwrap();
    device.enqueue_read(b"old boot log");

    dut.reset().unwrap();
    assert_eq!(device.dtr_log(), vec![false]);
    assert_eq!(device.rts_log(), vec![true, false]);
    assert!(device.was_cleared());
    assert_eq!(device.available_bytes(), 0);
    assert!(dut.buffered().is_empty());
}

#[test]
fn test_logged_dut_writes_timestamped_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("dut.log");
    let device = MockSerialPort::new("E2E_DUT_LOG");
    let handle = device.clone();
    let target = LogTarget::File(log_path.clone());
    let mut dut = SerialDut::new(
        "E2E_DUT_LOG",
        Box::new(move || LoggedPort::new(handle.clone(), target.clone(), DEFAULT_READ_INTERVAL)),
    )
    .opened()
    .unwrap();

    let mut feeder = device.clone();
    feeder.enqueue_read(b"line one\nline two\npartial");
    dut.expect_exact("line two", Duration::from_millis(100)).unwrap();
    dut.close();

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Saving E2E_DUT_LOG logs"));
    assert!(log.contains("line one\nline two\n"));
    // The partial line is flushed on close
    assert!(log.trim_end().ends_with("partial"));
    assert!(log.lines().any(|l| l.starts_with('[') && l.ends_with(']')));
}

#[test]
fn test_from_port_takes_the_lease_immediately() {
    let port = MockSerialPort::new("E2E_DUT_FROM_PORT");
    assert_eq!(port.name(), "E2E_DUT_FROM_PORT");
    let dut = SerialDut::from_port(port).unwrap();
    assert!(dut.is_open());
    assert!(matches!(
        SerialDut::from_port(MockSerialPort::new("E2E_DUT_FROM_PORT")),
        Err(DutError::PortBusy(_))
    ));
}
