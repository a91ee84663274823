//! Port listing and port-name resolution over a fixed OS device table.

use crate::common::{usb_port, FixedPorts};
use esptest::discovery::{compute_serial_port, list_ports_with, DiscoveryError, PortFilter, PortInfo};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn bench_ports() -> FixedPorts {
    FixedPorts(vec![
        usb_port("/dev/ttyUSB3", "1-5.4:1.0", 0x10c4, 0xea60),
        usb_port("/dev/ttyACM0", "3-2:1.0", 0x303a, 0x1001),
        usb_port("/dev/ttyUSB0", "1-5.1:1.0", 0x1a86, 0x7523),
        usb_port("/dev/ttyUSB1", "1-5.2:1.0", 0x10c4, 0xea60),
        // Same device reported twice by the OS
        usb_port("/dev/ttyUSB1", "1-5.2:1.0", 0x10c4, 0xea60),
        // No USB location: not a usable test port
        usb_port("/dev/ttyS0", "", 0, 0),
    ])
}

#[test]
fn test_listing_is_sorted_and_unique() {
    let ports = list_ports_with(&bench_ports(), None).unwrap();
    let devices: Vec<&str> = ports.iter().map(|p| p.device.as_str()).collect();
    assert_eq!(
        devices,
        vec!["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB3"]
    );
    assert!(ports.iter().all(|p| !p.location.is_empty() && !p.description.is_empty()));
}

#[test]
fn test_filters_combine() {
    let cp210x = PortFilter {
        vid: Some(0x10c4),
        pid: Some(0xea60),
        ..Default::default()
    };
    let ports = list_ports_with(&bench_ports(), Some(&cp210x)).unwrap();
    assert_eq!(ports.len(), 2);

    let on_hub = PortFilter {
        location: Some("1-5.".to_string()),
        ..cp210x
    };
    let ports = list_ports_with(&bench_ports(), Some(&on_hub)).unwrap();
    assert_eq!(ports.iter().map(PortInfo::name).collect::<Vec<_>>(), vec!["ttyUSB1", "ttyUSB3"]);

    let none = PortFilter {
        vid: Some(0xffff),
        ..Default::default()
    };
    assert!(list_ports_with(&bench_ports(), Some(&none)).unwrap().is_empty());
}

#[test]
fn test_port_is_resolved_from_any_spelling() {
    let ports = bench_ports();
    for spelling in ["/dev/ttyACM0", "ttyACM0", "3-2:1.0"] {
        assert_eq!(compute_serial_port(&ports, spelling, true).unwrap(), "/dev/ttyACM0");
    }
}

#[test]
fn test_unknown_port_is_kept_or_rejected() {
    let ports = bench_ports();
    assert_eq!(
        compute_serial_port(&ports, "/dev/ttyUSB9", false).unwrap(),
        "/dev/ttyUSB9"
    );
    assert!(matches!(
        compute_serial_port(&ports, "/dev/ttyUSB9", true),
        Err(DiscoveryError::NotFound(p)) if p == "/dev/ttyUSB9"
    ));
    // A port without a location is never listed, so it does not resolve
    assert!(compute_serial_port(&ports, "ttyS0", true).is_err());
}

#[test]
fn test_port_info_serializes_without_empty_options() {
    let port = usb_port("/dev/ttyUSB0", "1-5.1:1.0", 0x1a86, 0x7523);
    let json = serde_json::to_value(&port).unwrap();
    assert_eq!(json["device"], "/dev/ttyUSB0");
    assert_eq!(json["vid"], 0x1a86);
    assert!(json.get("serial_number").is_none());
}

fn arb_port() -> impl Strategy<Value = PortInfo> {
    (0u8..8, prop::option::of(0u8..4), any::<u16>(), any::<u16>()).prop_map(|(n, loc, vid, pid)| {
        usb_port(
            &format!("/dev/ttyUSB{n}"),
            &loc.map(|l| format!("1-{l}:1.0")).unwrap_or_default(),
            vid,
            pid,
        )
    })
}

proptest! {
    #[test]
    fn prop_listing_invariants(ports in prop::collection::vec(arb_port(), 0..16)) {
        let listed = list_ports_with(&FixedPorts(ports.clone()), None).unwrap();

        prop_assert!(listed.windows(2).all(|w| w[0].device < w[1].device));
        prop_assert!(listed.iter().all(|p| !p.device.is_empty() && !p.location.is_empty()));
        for port in &ports {
            if !port.location.is_empty() {
                prop_assert!(listed.iter().any(|p| p.device == port.device));
            }
        }
    }
}
