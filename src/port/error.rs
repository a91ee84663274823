//! Port-specific error types.
//!
//! Low-level transport failures, kept separate from the DUT and control
//! layers so each layer can decide how a raw failure surfaces.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified device was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The device is already held by another handle (in this process or by
    /// the OS exclusive lock).
    #[error("Port {0} is busy")]
    Busy(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Attempted to use a port that's not open.
    #[error("Port is not open")]
    NotOpen,

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Busy error from a port name.
    pub fn busy(port_name: impl Into<String>) -> Self {
        Self::Busy(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout(duration)
    }

    /// True when the error only means "no data arrived within the read
    /// timeout". Readers poll on these instead of failing.
    pub fn is_no_data(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
