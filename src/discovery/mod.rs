//! Serial device discovery.
//!
//! Enumerates USB serial devices visible to the OS and resolves user input
//! (device path, port name or USB location) to a device path.

mod system;

pub use system::SystemEnumerator;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// One enumerated serial device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub device: String,
    /// USB location, e.g. `1-5.1:1.0`.
    pub location: String,
    pub description: String,
    pub vid: u16,
    pub pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Last path component of the device, e.g. `ttyUSB0`.
    pub fn name(&self) -> &str {
        self.device
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.device)
    }

    /// `vvvv:pppp` in lowercase hex.
    pub fn hwid(&self) -> String {
        format!("{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Optional criteria applied to enumerated ports. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    /// Substring of the USB location.
    pub location: Option<String>,
}

impl PortFilter {
    pub fn matches(&self, port: &PortInfo) -> bool {
        self.vid.map_or(true, |vid| vid == port.vid)
            && self.pid.map_or(true, |pid| pid == port.pid)
            && self
                .location
                .as_deref()
                .map_or(true, |loc| port.location.contains(loc))
    }
}

/// Errors raised by port discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The OS enumeration call itself failed.
    #[error("Failed to enumerate serial ports: {0}")]
    Enumeration(#[from] serialport::Error),

    #[error("No serial port matches {0}")]
    NotFound(String),
}

/// Source of the OS device table.
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator {
    fn enumerate(&self) -> Result<Vec<PortInfo>, DiscoveryError>;
}

/// List USB serial ports on this host, optionally filtered.
pub fn list_ports(filter: Option<&PortFilter>) -> Result<Vec<PortInfo>, DiscoveryError> {
    list_ports_with(&SystemEnumerator, filter)
}

/// List ports from `enumerator`: drops entries without device or location,
/// de-duplicates by device path and sorts by device path.
pub fn list_ports_with(
    enumerator: &dyn PortEnumerator,
    filter: Option<&PortFilter>,
) -> Result<Vec<PortInfo>, DiscoveryError> {
    let mut ports: Vec<PortInfo> = enumerator
        .enumerate()?
        .into_iter()
        .filter(|p| !p.device.is_empty() && !p.location.is_empty())
        .filter(|p| filter.map_or(true, |f| f.matches(p)))
        .collect();

    ports.sort_by(|a, b| a.device.cmp(&b.device));
    ports.dedup_by(|a, b| a.device == b.device);
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports)
}

/// Resolve a device path, port name or USB location to a device path.
///
/// When nothing matches, the input is returned unchanged with a warning, or
/// [`DiscoveryError::NotFound`] is returned if `strict`.
pub fn compute_serial_port(
    enumerator: &dyn PortEnumerator,
    port: &str,
    strict: bool,
) -> Result<String, DiscoveryError> {
    let ports = list_ports_with(enumerator, None)?;
    if let Some(found) = ports
        .iter()
        .find(|p| p.device == port || p.name() == port || p.location == port)
    {
        return Ok(found.device.clone());
    }
    if strict {
        return Err(DiscoveryError::NotFound(port.to_string()));
    }
    warn!("Can not compute port {port}, does it exist?");
    Ok(port.to_string())
}

/// Parse a USB id given as `0x303a`, `303a` or `303A`.
pub fn parse_usb_id(text: &str) -> Result<u16, std::num::ParseIntError> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16)
}
