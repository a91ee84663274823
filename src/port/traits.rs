//! Core traits for port abstraction.
//!
//! Defines the `SerialPortAdapter` trait that lets real serial ports, network
//! sockets and mock implementations be used interchangeably underneath a DUT
//! or a control session.

use super::error::PortError;
use std::time::Duration;

/// Settings for opening a serial device. Framing is always 8N1 without flow
/// control, which is what ESP boot ROMs and the supported attenuators use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Initial read/write timeout.
    pub timeout: Duration,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            timeout: Duration::from_millis(5),
        }
    }
}

impl PortConfiguration {
    /// The given baud rate with the default short poll timeout.
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }
}

/// Trait for raw port I/O operations.
///
/// Reads block for at most the configured timeout. "No data yet" is reported
/// as an error for which [`PortError::is_no_data`] is true, never as an
/// indefinite block.
///
/// Adapters own their transport, so they are `'static` and can be boxed or
/// moved into a DUT connector.
pub trait SerialPortAdapter: Send + std::fmt::Debug + 'static {
    /// Write bytes to the port.
    ///
    /// Returns the number of bytes actually written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read bytes from the port into the provided buffer.
    ///
    /// Returns the number of bytes actually read.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Get the name/path of this port.
    fn name(&self) -> &str;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError>;

    /// Drop pending input and output.
    fn clear_buffers(&mut self) -> Result<(), PortError>;

    /// Drive the RTS modem line. Transports without modem lines ignore it.
    fn write_request_to_send(&mut self, _level: bool) -> Result<(), PortError> {
        Ok(())
    }

    /// Drive the DTR modem line. Transports without modem lines ignore it.
    fn write_data_terminal_ready(&mut self, _level: bool) -> Result<(), PortError> {
        Ok(())
    }

    /// Write the whole buffer, retrying on partial writes.
    fn write_all_bytes(&mut self, mut data: &[u8]) -> Result<(), PortError> {
        while !data.is_empty() {
            let n = self.write_bytes(data)?;
            if n == 0 {
                return Err(PortError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "port accepted zero bytes",
                )));
            }
            data = &data[n..];
        }
        Ok(())
    }
}
