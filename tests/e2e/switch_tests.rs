//! H3C switch sessions driven through a scripted telnet peer.

use esptest::config::SwitchConfig;
use esptest::control::{DeviceCommandError, H3cSwitch, SwitchControl, SwitchTarget};
use esptest::dut::{DutError, SerialDut};
use esptest::port::MockSerialPort;
use pretty_assertions::assert_eq;

const SYSNAME: &str = "LAB-SW01";

fn scripted_peer(name: &str) -> (SerialDut<MockSerialPort>, MockSerialPort) {
    let mut peer = MockSerialPort::new(name);
    peer.enqueue_read(b"\r\nUsername: ");
    peer.respond_to(b"tester\r\n", b"tester\r\nPassword:");
    peer.respond_to(b"hunter2\r\n", format!("\r\n<{SYSNAME}>").as_bytes());
    peer.respond_to(
        b"screen-length disable\r\n",
        format!("screen-length disable\r\n<{SYSNAME}>").as_bytes(),
    );
    peer.respond_to(
        b"system-view\r\n",
        format!("system-view\r\nSystem View: return to User View with Ctrl+Z.\r\n[{SYSNAME}]").as_bytes(),
    );
    peer.respond_to(b"\r\n", format!("\r\n[{SYSNAME}]").as_bytes());
    let handle = peer.clone();
    (SerialDut::new(name, Box::new(move || Ok(handle.clone()))), peer)
}

fn config() -> SwitchConfig {
    SwitchConfig {
        username: "tester".to_string(),
        password: "hunter2".to_string(),
        interface_prefix: "XGE".to_string(),
        timeout_ms: 300,
        ..Default::default()
    }
}

#[test]
fn test_vlan_table_is_parsed() {
    let (session, mut peer) = scripted_peer("E2E_SW_VLANS");
    peer.respond_to(
        b"display interface Vlan-interface brief\r\n",
        format!(
            "display interface Vlan-interface brief\r\n\
Brief information on interfaces in route mode:\r\n\
Link: ADM - administratively down; Stby - standby\r\n\
Interface            Link Protocol Primary IP      Description\r\n\
Vlan1                UP   UP       192.168.0.233   mgmt\r\n\
Vlan111              DOWN DOWN     --              \r\n\
[{SYSNAME}]"
        )
        .as_bytes(),
    );
    let mut switch = H3cSwitch::login(session, config()).unwrap();

    let vlans = switch.vlans().unwrap();
    assert_eq!(vlans.len(), 2);
    assert_eq!(vlans[0].id, 1);
    assert_eq!(vlans[0].ip, "192.168.0.233");
    assert_eq!(vlans[0].description, "mgmt");
    assert_eq!(vlans[1].interface_name, "Vlan111");
    assert_eq!(vlans[1].status, "DOWN");
}

#[test]
fn test_access_vlan_change_is_saved_on_drop() {
    let (session, mut peer) = scripted_peer("E2E_SW_VLAN_SET");
    peer.respond_to(
        b"interface XGE1/0/7\r\n",
        format!("interface XGE1/0/7\r\n[{SYSNAME}-Ten-GigabitEthernet1/0/7]").as_bytes(),
    );
    peer.respond_to(
        b"port access vlan 111\r\n",
        format!("port access vlan 111\r\n[{SYSNAME}-Ten-GigabitEthernet1/0/7]").as_bytes(),
    );
    peer.respond_to(
        b"save f\r\n",
        format!(
            "save f\r\nValidating file. Please wait...\r\n\
Saved the current configuration to mainboard device successfully.\r\n[{SYSNAME}]"
        )
        .as_bytes(),
    );

    let mut switch = H3cSwitch::login(session, config()).unwrap();
    assert_eq!(switch.interface_name(&SwitchTarget::new("", 7)), "XGE1/0/7");
    switch.set_port_vlan(&SwitchTarget::new("", 7), 111).unwrap();
    assert!(switch.needs_save());
    drop(switch);

    let written = String::from_utf8(peer.written()).unwrap();
    assert!(written.contains("interface XGE1/0/7\r\nport access vlan 111\r\n"));
    assert!(written.ends_with("save f\r\n"));
}

#[test]
fn test_read_only_session_does_not_save() {
    let (session, peer) = scripted_peer("E2E_SW_NO_SAVE");
    let mut switch = H3cSwitch::login(session, config()).unwrap();
    switch.disconnect().unwrap();
    // A second disconnect is a no-op
    switch.disconnect().unwrap();
    drop(switch);

    let written = String::from_utf8(peer.written()).unwrap();
    assert!(!written.contains("save"));
}

#[test]
fn test_wrong_password_times_out() {
    let (session, _peer) = scripted_peer("E2E_SW_BAD_LOGIN");
    let config = SwitchConfig {
        password: "wrong".to_string(),
        timeout_ms: 50,
        ..config()
    };
    match H3cSwitch::login(session, config) {
        Err(DeviceCommandError::Session(DutError::Timeout { .. })) => {}
        Err(other) => panic!("expected a login timeout, got {other:?}"),
        Ok(_) => panic!("login should fail"),
    }
}

#[test]
fn test_target_on_another_switch_is_rejected() {
    let (session, mut peer) = scripted_peer("E2E_SW_TARGET");
    let mut switch = H3cSwitch::login(session, config()).unwrap();
    peer.clear_write_log();

    let other = SwitchTarget::new("10.9.9.9:23", 1);
    assert!(matches!(
        switch.set_port_enabled(&other, true),
        Err(DeviceCommandError::NotFound(_))
    ));
    assert!(peer.written().is_empty());

    let own = SwitchTarget::new("E2E_SW_TARGET", 1);
    assert!(matches!(
        switch.get_status(&own),
        Err(DeviceCommandError::Session(_))
    ));
}
