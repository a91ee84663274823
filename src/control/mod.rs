//! Side-channel device control: RF attenuators and managed switches.
//!
//! Each backend runs a short request/response exchange over the device's own
//! protocol and parses a fixed-format reply. A failed exchange is returned as
//! [`DeviceCommandError`]; nothing here retries.

pub mod attenuator;
pub mod switch;

pub use attenuator::{
    att_fix, find_att_dev, find_att_dev_with, parse_att_value, AttDevice, AttTransport, AttType,
    Attenuator, AttenuatorProtocol, BinaryProtocol, MiniCircuitsProtocol, WuyouProtocol,
};
pub use switch::{H3cSwitch, InterfaceInfo, VlanInfo};

use crate::discovery::DiscoveryError;
use crate::dut::DutError;
use crate::port::PortError;
use std::fmt;
use thiserror::Error;

/// One controllable channel or port on an external device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchTarget {
    /// Device path, USB location or `host:port`.
    pub address: String,
    /// Attenuator channel or switch interface index.
    pub index: u32,
}

impl SwitchTarget {
    pub fn new(address: impl Into<String>, index: u32) -> Self {
        Self {
            address: address.into(),
            index,
        }
    }
}

impl fmt::Display for SwitchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.index)
    }
}

/// A control exchange that failed or could not be started.
#[derive(Debug, Error)]
pub enum DeviceCommandError {
    /// Rejected before any I/O, or refused by the device as out of range.
    #[error("Value {value} is outside 0..={max}")]
    OutOfRange { value: f64, max: f64 },

    #[error("No reply to {command:?}")]
    NoResponse { command: String },

    #[error("Unexpected reply {reply:?} to {command:?}")]
    UnexpectedReply { command: String, reply: String },

    #[error("Malformed reply: {0:?}")]
    Malformed(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Port(#[from] PortError),

    /// Failure of the interactive shell session behind a switch.
    #[error(transparent)]
    Session(#[from] DutError),
}

impl DeviceCommandError {
    pub(crate) fn unexpected(command: &[u8], reply: &[u8]) -> Self {
        Self::UnexpectedReply {
            command: String::from_utf8_lossy(command).trim_end().to_string(),
            reply: String::from_utf8_lossy(reply).trim_end().to_string(),
        }
    }
}

/// Attenuation control.
pub trait AttenuatorControl {
    /// Set `value` dB on `target`'s channel.
    fn set_attenuation(&mut self, target: &SwitchTarget, value: f64)
        -> Result<(), DeviceCommandError>;

    /// Current attenuation of `target`'s channel in dB.
    fn get_status(&mut self, target: &SwitchTarget) -> Result<f64, DeviceCommandError>;
}

/// Port-level control of a managed switch.
pub trait SwitchControl {
    fn get_status(&mut self, target: &SwitchTarget) -> Result<InterfaceInfo, DeviceCommandError>;

    /// `shutdown` / `undo shutdown` on the target interface.
    fn set_port_enabled(&mut self, target: &SwitchTarget, enabled: bool)
        -> Result<(), DeviceCommandError>;

    /// Put the target interface in access mode on `vlan`.
    fn set_port_vlan(&mut self, target: &SwitchTarget, vlan: u16) -> Result<(), DeviceCommandError>;
}
