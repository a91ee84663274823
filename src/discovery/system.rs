//! Host enumeration through the `serialport` crate.

use super::{DiscoveryError, PortEnumerator, PortInfo};
use serialport::{SerialPortType, UsbPortInfo};

/// Reads the live OS device table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnumerator;

impl PortEnumerator for SystemEnumerator {
    fn enumerate(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .filter_map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => Some(port_info(p.port_name, usb)),
                _ => None,
            })
            .collect())
    }
}

fn port_info(device: String, usb: UsbPortInfo) -> PortInfo {
    let location = usb_location(&device).unwrap_or_else(|| fallback_location(&usb));
    let description = describe(&usb);
    PortInfo {
        device,
        location,
        description,
        vid: usb.vid,
        pid: usb.pid,
        manufacturer: usb.manufacturer,
        serial_number: usb.serial_number,
    }
}

fn describe(usb: &UsbPortInfo) -> String {
    fn non_blank(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
    non_blank(&usb.product)
        .or_else(|| non_blank(&usb.manufacturer))
        .unwrap_or("USB serial device")
        .to_string()
}

fn fallback_location(usb: &UsbPortInfo) -> String {
    match &usb.serial_number {
        Some(sn) => format!("{:04x}:{:04x}:{sn}", usb.vid, usb.pid),
        None => format!("{:04x}:{:04x}", usb.vid, usb.pid),
    }
}

#[cfg(target_os = "linux")]
fn usb_location(device: &str) -> Option<String> {
    let name = device.rsplit('/').next()?;
    let path = std::fs::canonicalize(format!("/sys/class/tty/{name}/device")).ok()?;
    location_from_sysfs_path(&path)
}

#[cfg(not(target_os = "linux"))]
fn usb_location(_device: &str) -> Option<String> {
    None
}

/// Pick the USB interface component (`<bus>-<ports>:<config>.<iface>`) out of
/// a sysfs device path.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn location_from_sysfs_path(path: &std::path::Path) -> Option<String> {
    static INTERFACE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"^\d+-[\d.]+:\d+\.\d+$").expect("static regex")
    });
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .find(|c| INTERFACE.is_match(c))
        .map(str::to_string)
}
