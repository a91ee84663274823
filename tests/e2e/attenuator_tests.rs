//! Attenuator lookup and control exchanges against mock devices.

use crate::common::{usb_port, FixedPorts};
use esptest::control::{
    find_att_dev_with, AttTransport, AttType, Attenuator, AttenuatorControl, DeviceCommandError,
};
use esptest::port::{MockSerialPort, PortError, PortLease};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn session(name: &str, att_type: AttType) -> (Attenuator<MockSerialPort>, MockSerialPort) {
    let device = MockSerialPort::new(name);
    let att = Attenuator::new(device.clone(), att_type.protocol())
        .unwrap()
        .with_read_delay(Duration::ZERO);
    (att, device)
}

#[test]
fn test_status_reply_is_parsed() {
    let (mut att, mut device) = session("E2E_ATT_STATUS", AttType::Wuyou);
    device.respond_to(b"READ\r\n", b"ATT=10");

    let target = att.target(1);
    assert_eq!(att.get_status(&target).unwrap(), 10.0);
}

#[test]
fn test_discovered_attenuator_is_controlled_end_to_end() {
    let ports = FixedPorts(vec![
        usb_port("E2E_ATT_CP2102", "1-1:1.0", 0x10c4, 0xea60),
        usb_port("E2E_ATT_WUYOU", "1-4:1.0", 0x0483, 0x5740),
    ]);
    let dev = find_att_dev_with(&ports, None, None).unwrap();
    assert_eq!(dev.address, "E2E_ATT_WUYOU");
    assert_eq!(dev.att_type, AttType::Wuyou);
    assert_eq!(dev.transport, AttTransport::Serial);

    let (mut att, mut device) = session(&dev.address, dev.att_type);
    device.respond_to(b"att-045.00\r\n", b"attOK\r\n");
    device.respond_to(b"READ\r\n", b"ATT = -45.00\r\n");

    att.set_attenuation(&dev.target(1), 45.0).unwrap();
    assert_eq!(
        device.get_write_log(),
        vec![b"att-045.00\r\n".to_vec(), b"READ\r\n".to_vec()]
    );
}

#[test]
fn test_binary_attenuator_ack() {
    let (mut att, mut device) = session("E2E_ATT_BINARY", AttType::Ridgestone);
    device.respond_to(&[0x7e, 0x7e, 0x10, 20, 0x24], &[0x7e, 0x7e, 0x20, 20, 0x34]);

    let target = att.target(1);
    att.set_attenuation(&target, 20.0).unwrap();

    // A different acknowledgement value is a failure
    device.respond_to(&[0x7e, 0x7e, 0x10, 21, 0x25], &[0x7e, 0x7e, 0x20, 20, 0x34]);
    assert!(matches!(
        att.set_attenuation(&target, 21.0),
        Err(DeviceCommandError::UnexpectedReply { .. })
    ));
}

#[test]
fn test_mini_circuits_range_reply() {
    let (mut att, mut device) = session("E2E_ATT_MCL", AttType::MiniCircuits);
    device.respond_to(b":CHAN:2:SETATT:30.25\r\n", b"1\r\n");
    device.respond_to(b":CHAN:2:ATT?\r\n", b"30.25\r\n");
    let target = att.target(2);
    att.set_attenuation(&target, 30.25).unwrap();

    device.respond_to(b":CHAN:2:SETATT:90.00\r\n", b"2\r\n");
    assert!(matches!(
        att.set_attenuation(&target, 90.0),
        Err(DeviceCommandError::OutOfRange { .. })
    ));
}

#[test]
fn test_fractional_value_on_whole_db_device_is_unsupported() {
    let (mut att, device) = session("E2E_ATT_FRACT", AttType::Wuyou);
    let target = att.target(1);
    assert!(matches!(
        att.set_attenuation(&target, 10.5),
        Err(DeviceCommandError::Unsupported(_))
    ));
    assert!(device.get_write_log().is_empty());
}

#[test]
fn test_attenuator_session_holds_the_port() {
    let (att, _device) = session("E2E_ATT_LEASE", AttType::Wuyou);
    assert!(PortLease::is_held("E2E_ATT_LEASE"));

    let second = Attenuator::new(MockSerialPort::new("E2E_ATT_LEASE"), AttType::Wuyou.protocol());
    assert!(matches!(
        second,
        Err(DeviceCommandError::Port(PortError::Busy(_)))
    ));

    drop(att);
    assert!(!PortLease::is_held("E2E_ATT_LEASE"));
}

#[test]
fn test_unplugged_attenuator_is_a_port_error() {
    let (mut att, mut device) = session("E2E_ATT_UNPLUG", AttType::Wuyou);
    device.set_disconnected(true);
    let target = att.target(1);
    assert!(matches!(
        att.get_status(&target),
        Err(DeviceCommandError::Port(_))
    ));
}
