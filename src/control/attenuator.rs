//! Programmable RF attenuators.
//!
//! Vendors differ only in how a request is encoded and a reply is judged, so
//! each one is an [`AttenuatorProtocol`]. [`Attenuator`] owns the port and
//! runs the exchange; [`find_att_dev`] picks the vendor and transport from the
//! device table.

use super::{AttenuatorControl, DeviceCommandError, SwitchTarget};
use crate::config::AttenuatorConfig;
use crate::discovery::{list_ports_with, PortEnumerator, SystemEnumerator};
use crate::port::{PortConfiguration, PortLease, SerialPortAdapter, SyncSerialPort, TcpPort};
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// How long the reply may pause before it is considered complete.
const REPLY_GAP: Duration = Duration::from_millis(50);

/// Supported attenuator vendors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum AttType {
    /// Wuyou electronics (DC-6 GHz, 90 dB)
    #[value(name = "wuyou")]
    Wuyou,
    /// Ridgestone, behind a Prolific PL2303
    #[value(name = "ridgestone")]
    Ridgestone,
    /// Attenuators behind an FTDI FT232
    #[value(name = "future_technology")]
    FutureTechnology,
    /// Mini-Circuits, reached over its telnet interface
    #[value(name = "mini_circuits")]
    MiniCircuits,
}

impl AttType {
    pub const ALL: [AttType; 4] = [
        AttType::Wuyou,
        AttType::Ridgestone,
        AttType::FutureTechnology,
        AttType::MiniCircuits,
    ];

    /// USB vendor and product id.
    pub fn ids(self) -> (u16, u16) {
        match self {
            Self::Wuyou => (0x0483, 0x5740),
            Self::Ridgestone => (0x067b, 0x2303),
            Self::FutureTechnology => (0x0403, 0x6001),
            Self::MiniCircuits => (0x20ce, 0x0023),
        }
    }

    pub fn from_ids(vid: u16, pid: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.ids() == (vid, pid))
    }

    /// Largest settable attenuation in dB.
    pub fn max(self) -> f64 {
        match self {
            Self::MiniCircuits => 95.0,
            Self::Wuyou => 92.0,
            Self::Ridgestone | Self::FutureTechnology => 62.0,
        }
    }

    pub fn is_network(self) -> bool {
        matches!(self, Self::MiniCircuits)
    }

    /// Vendors using the 5-byte binary frame.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Ridgestone | Self::FutureTechnology)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wuyou => "wuyou",
            Self::Ridgestone => "ridgestone",
            Self::FutureTechnology => "future_technology",
            Self::MiniCircuits => "mini_circuits",
        }
    }

    pub fn protocol(self) -> Box<dyn AttenuatorProtocol> {
        match self {
            Self::Wuyou => Box::new(WuyouProtocol),
            Self::Ridgestone | Self::FutureTechnology => Box::new(BinaryProtocol { att_type: self }),
            Self::MiniCircuits => Box::new(MiniCircuitsProtocol),
        }
    }
}

impl fmt::Display for AttType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown attenuator type {s:?}"))
    }
}

/// Wire format of one vendor.
pub trait AttenuatorProtocol: Send + fmt::Debug {
    fn att_type(&self) -> AttType;

    /// Encode a set request. `value` is already range checked.
    fn set_request(&self, channel: u32, value: f64) -> Result<Vec<u8>, DeviceCommandError>;

    /// Judge the reply to `request`.
    fn check_set_reply(
        &self,
        request: &[u8],
        reply: &[u8],
        value: f64,
    ) -> Result<(), DeviceCommandError>;

    /// Encode a status query, if the vendor has one.
    fn status_request(&self, _channel: u32) -> Option<Vec<u8>> {
        None
    }

    /// Attenuation reported by a status reply.
    fn parse_status(&self, reply: &[u8]) -> Result<f64, DeviceCommandError> {
        parse_att_value(&String::from_utf8_lossy(reply))
            .ok_or_else(|| DeviceCommandError::Malformed(String::from_utf8_lossy(reply).into_owned()))
    }
}

fn whole_db(att_type: AttType, value: f64) -> Result<u8, DeviceCommandError> {
    if value.fract() != 0.0 {
        return Err(DeviceCommandError::Unsupported(format!(
            "{att_type} only takes whole dB values, got {value}"
        )));
    }
    u8::try_from(value as u32).map_err(|_| DeviceCommandError::OutOfRange {
        value,
        max: att_type.max(),
    })
}

/// `att-NNN.00` text protocol with a `READ` status query.
#[derive(Debug, Clone, Copy, Default)]
pub struct WuyouProtocol;

impl AttenuatorProtocol for WuyouProtocol {
    fn att_type(&self) -> AttType {
        AttType::Wuyou
    }

    fn set_request(&self, _channel: u32, value: f64) -> Result<Vec<u8>, DeviceCommandError> {
        let db = whole_db(AttType::Wuyou, value)?;
        Ok(format!("att-{db:03}.00\r\n").into_bytes())
    }

    fn check_set_reply(&self, request: &[u8], reply: &[u8], _value: f64) -> Result<(), DeviceCommandError> {
        if memmem::find(reply, b"attOK").is_some() {
            Ok(())
        } else {
            Err(DeviceCommandError::unexpected(request, reply))
        }
    }

    fn status_request(&self, _channel: u32) -> Option<Vec<u8>> {
        Some(b"READ\r\n".to_vec())
    }
}

/// `7E 7E 10 v 10+v` frame, acknowledged with `7E 7E 20 v 20+v`.
#[derive(Debug, Clone, Copy)]
pub struct BinaryProtocol {
    pub att_type: AttType,
}

impl AttenuatorProtocol for BinaryProtocol {
    fn att_type(&self) -> AttType {
        self.att_type
    }

    fn set_request(&self, _channel: u32, value: f64) -> Result<Vec<u8>, DeviceCommandError> {
        let db = whole_db(self.att_type, value)?;
        Ok(vec![0x7e, 0x7e, 0x10, db, 0x10 + db])
    }

    fn check_set_reply(&self, request: &[u8], reply: &[u8], value: f64) -> Result<(), DeviceCommandError> {
        let db = whole_db(self.att_type, value)?;
        let expected = [0x7e, 0x7e, 0x20, db, 0x20 + db];
        if memmem::find(reply, &expected).is_some() {
            Ok(())
        } else {
            Err(DeviceCommandError::UnexpectedReply {
                command: hex(request),
                reply: hex(reply),
            })
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Mini-Circuits SCPI-like line protocol.
///
/// Set replies are `1` (done), `0` (below range) or `2` (above range).
#[derive(Debug, Clone, Copy, Default)]
pub struct MiniCircuitsProtocol;

fn last_line(reply: &[u8]) -> String {
    String::from_utf8_lossy(reply)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("")
        .to_string()
}

impl AttenuatorProtocol for MiniCircuitsProtocol {
    fn att_type(&self) -> AttType {
        AttType::MiniCircuits
    }

    fn set_request(&self, channel: u32, value: f64) -> Result<Vec<u8>, DeviceCommandError> {
        Ok(format!(":CHAN:{channel}:SETATT:{value:.2}\r\n").into_bytes())
    }

    fn check_set_reply(&self, request: &[u8], reply: &[u8], value: f64) -> Result<(), DeviceCommandError> {
        match last_line(reply).as_str() {
            "1" => Ok(()),
            "0" | "2" => Err(DeviceCommandError::OutOfRange {
                value,
                max: AttType::MiniCircuits.max(),
            }),
            _ => Err(DeviceCommandError::unexpected(request, reply)),
        }
    }

    fn status_request(&self, channel: u32) -> Option<Vec<u8>> {
        Some(format!(":CHAN:{channel}:ATT?\r\n").into_bytes())
    }

    fn parse_status(&self, reply: &[u8]) -> Result<f64, DeviceCommandError> {
        let line = last_line(reply);
        parse_att_value(&line).ok_or(DeviceCommandError::Malformed(line))
    }
}

static ATT_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:ATT\s*=\s*)?-?(\d+(?:\.\d+)?)\s*(?:dB)?\s*$").expect("static regex")
});

/// Attenuation magnitude from a status line: `ATT=10`, `ATT = -10.00` and
/// `10.25` are all accepted. The first matching line wins.
pub fn parse_att_value(text: &str) -> Option<f64> {
    text.lines()
        .filter_map(|line| ATT_VALUE.captures(line))
        .find_map(|caps| caps.get(1)?.as_str().parse().ok())
}

/// Compensate the step error binary attenuators show from 33 dB up.
pub fn att_fix(db: u8) -> u8 {
    if db < 33 {
        return db;
    }
    let offset = db - 30;
    if (offset + 1) % 4 == 0 {
        db - 1
    } else if offset % 4 == 0 {
        db + 1
    } else {
        db
    }
}

/// An attenuator session over port `P`.
pub struct Attenuator<P: SerialPortAdapter> {
    port: P,
    protocol: Box<dyn AttenuatorProtocol>,
    read_delay: Duration,
    att_fix: bool,
    _lease: PortLease,
}

impl<P: SerialPortAdapter> Attenuator<P> {
    pub fn new(port: P, protocol: Box<dyn AttenuatorProtocol>) -> Result<Self, DeviceCommandError> {
        let lease = PortLease::acquire(port.name())?;
        debug!(device = port.name(), att = %protocol.att_type(), "attenuator session opened");
        Ok(Self {
            port,
            protocol,
            read_delay: Duration::from_millis(500),
            att_fix: false,
            _lease: lease,
        })
    }

    /// Wait between writing a request and reading the reply.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn with_att_fix(mut self, enabled: bool) -> Self {
        self.att_fix = enabled;
        self
    }

    pub fn address(&self) -> &str {
        self.port.name()
    }

    pub fn att_type(&self) -> AttType {
        self.protocol.att_type()
    }

    /// Target for `channel` on this device.
    pub fn target(&self, channel: u32) -> SwitchTarget {
        SwitchTarget::new(self.address(), channel)
    }

    fn check_target(&self, target: &SwitchTarget) -> Result<(), DeviceCommandError> {
        if target.address.is_empty() || target.address == self.address() {
            Ok(())
        } else {
            Err(DeviceCommandError::NotFound(format!(
                "{target} is not served by {}",
                self.address()
            )))
        }
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceCommandError> {
        self.port.clear_buffers()?;
        self.port.write_all_bytes(request)?;
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        self.port.set_timeout(REPLY_GAP)?;
        let mut reply = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match self.port.read_bytes(&mut chunk) {
                Ok(0) => break,
                Ok(n) => reply.extend_from_slice(&chunk[..n]),
                Err(e) if e.is_no_data() => break,
                Err(e) => return Err(e.into()),
            }
        }
        debug!(device = self.address(), ?request, ?reply, "attenuator exchange");

        if reply.is_empty() {
            return Err(DeviceCommandError::NoResponse {
                command: String::from_utf8_lossy(request).trim_end().to_string(),
            });
        }
        Ok(reply)
    }
}

impl<P: SerialPortAdapter> AttenuatorControl for Attenuator<P> {
    fn set_attenuation(&mut self, target: &SwitchTarget, value: f64) -> Result<(), DeviceCommandError> {
        self.check_target(target)?;
        let att_type = self.att_type();
        let max = att_type.max();
        if !value.is_finite() || !(0.0..=max).contains(&value) {
            return Err(DeviceCommandError::OutOfRange { value, max });
        }

        let mut value = value;
        if self.att_fix && att_type.is_binary() && value.fract() == 0.0 {
            let fixed = f64::from(att_fix(value as u8)).min(max);
            if fixed != value {
                debug!(requested = value, fixed, "att_fix adjusted value");
            }
            value = fixed;
        }

        let request = self.protocol.set_request(target.index, value)?;
        let reply = self.exchange(&request)?;
        self.protocol.check_set_reply(&request, &reply, value)?;

        if let Some(query) = self.protocol.status_request(target.index) {
            let reply = self.exchange(&query)?;
            let actual = self.protocol.parse_status(&reply)?;
            if (actual - value).abs() > 0.01 {
                return Err(DeviceCommandError::unexpected(&query, &reply));
            }
        }

        info!(att = %att_type, device = self.address(), value, "attenuation set");
        Ok(())
    }

    fn get_status(&mut self, target: &SwitchTarget) -> Result<f64, DeviceCommandError> {
        self.check_target(target)?;
        let query = self
            .protocol
            .status_request(target.index)
            .ok_or_else(|| {
                DeviceCommandError::Unsupported(format!("{} has no status query", self.att_type()))
            })?;
        let reply = self.exchange(&query)?;
        self.protocol.parse_status(&reply)
    }
}

impl<P: SerialPortAdapter> fmt::Debug for Attenuator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attenuator")
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("read_delay", &self.read_delay)
            .field("att_fix", &self.att_fix)
            .finish()
    }
}

/// How a resolved attenuator is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttTransport {
    Serial,
    Tcp,
}

/// A located attenuator, not yet opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttDevice {
    /// Serial device path or `host:port`.
    pub address: String,
    pub att_type: AttType,
    pub transport: AttTransport,
}

impl AttDevice {
    /// Open a control session.
    pub fn open(&self, config: &AttenuatorConfig) -> Result<Box<dyn AttenuatorControl>, DeviceCommandError> {
        info!(att = %self.att_type, device = %self.address, "opening attenuator");
        let protocol = self.att_type.protocol();
        match self.transport {
            AttTransport::Serial => {
                let port = SyncSerialPort::open(&self.address, PortConfiguration::with_baud(config.baud))?;
                Ok(Box::new(
                    Attenuator::new(port, protocol)?
                        .with_read_delay(config.read_delay())
                        .with_att_fix(config.att_fix),
                ))
            }
            AttTransport::Tcp => {
                let port = TcpPort::connect(&self.address, config.connect_timeout(), true)?;
                Ok(Box::new(
                    Attenuator::new(port, protocol)?.with_read_delay(config.read_delay()),
                ))
            }
        }
    }

    /// Target for `channel` on this device.
    pub fn target(&self, channel: u32) -> SwitchTarget {
        SwitchTarget::new(self.address.clone(), channel)
    }
}

fn is_network_address(device: &str) -> bool {
    device.rsplit_once(':').is_some_and(|(host, port)| {
        !host.is_empty() && !host.contains(['/', '\\']) && port.parse::<u16>().is_ok()
    })
}

/// Locate an attenuator on this host. See [`find_att_dev_with`].
pub fn find_att_dev(device: Option<&str>, att_type: Option<AttType>) -> Result<AttDevice, DeviceCommandError> {
    find_att_dev_with(&SystemEnumerator, device, att_type)
}

/// Locate an attenuator.
///
/// `device` may be a serial device path, port name, USB location or a
/// `host:port` for network attenuators. Without `device`, the first serial
/// port whose VID/PID belongs to a known vendor (of `att_type`, if given) is
/// used. An explicit `att_type` overrides the VID/PID lookup.
pub fn find_att_dev_with(
    enumerator: &dyn PortEnumerator,
    device: Option<&str>,
    att_type: Option<AttType>,
) -> Result<AttDevice, DeviceCommandError> {
    if let Some(wanted) = att_type.filter(|t| t.is_network()) {
        return match device {
            Some(dev) if is_network_address(dev) => Ok(AttDevice {
                address: dev.to_string(),
                att_type: wanted,
                transport: AttTransport::Tcp,
            }),
            _ => Err(DeviceCommandError::NotFound(format!(
                "{wanted} attenuators need a host:port address"
            ))),
        };
    }

    let ports = list_ports_with(enumerator, None)?;
    let serial_type = |vid, pid| {
        AttType::from_ids(vid, pid)
            .filter(|t| !t.is_network() && att_type.map_or(true, |w| w == *t))
    };

    let Some(dev) = device else {
        return ports
            .iter()
            .find_map(|p| {
                serial_type(p.vid, p.pid).map(|t| AttDevice {
                    address: p.device.clone(),
                    att_type: t,
                    transport: AttTransport::Serial,
                })
            })
            .ok_or_else(|| {
                DeviceCommandError::NotFound(match att_type {
                    Some(t) => format!("no {t} attenuator connected"),
                    None => "no attenuator connected".to_string(),
                })
            });
    };

    if let Some(port) = ports
        .iter()
        .find(|p| p.device == dev || p.name() == dev || p.location == dev)
    {
        let resolved = att_type.or_else(|| serial_type(port.vid, port.pid)).ok_or_else(|| {
            DeviceCommandError::NotFound(format!(
                "{} ({}) is not a known attenuator",
                port.device,
                port.hwid()
            ))
        })?;
        return Ok(AttDevice {
            address: port.device.clone(),
            att_type: resolved,
            transport: AttTransport::Serial,
        });
    }

    if is_network_address(dev) {
        return match att_type {
            None => Ok(AttDevice {
                address: dev.to_string(),
                att_type: AttType::MiniCircuits,
                transport: AttTransport::Tcp,
            }),
            Some(t) => Err(DeviceCommandError::Unsupported(format!(
                "{t} attenuators are serial devices, got {dev}"
            ))),
        };
    }

    match att_type {
        Some(t) => Ok(AttDevice {
            address: dev.to_string(),
            att_type: t,
            transport: AttTransport::Serial,
        }),
        None => Err(DeviceCommandError::NotFound(dev.to_string())),
    }
}
