//! TCP transport for network side-channel devices.
//!
//! Switches and network attenuators speak a line-oriented command shell over
//! telnet. With `telnet` enabled, IAC option negotiation from the peer is
//! refused (WONT/DONT) and stripped from the data stream so callers only see
//! the shell text.

use super::error::PortError;
use super::traits::SerialPortAdapter;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Port implementation over a TCP socket.
pub struct TcpPort {
    stream: TcpStream,
    name: String,
    telnet: bool,
    pending: Vec<u8>,
}

impl TcpPort {
    /// Connect to `address` (`host:port`) within `connect_timeout`.
    pub fn connect(address: &str, connect_timeout: Duration, telnet: bool) -> Result<Self, PortError> {
        let addr: SocketAddr = address
            .to_socket_addrs()
            .map_err(|e| PortError::config(format!("invalid address {address}: {e}")))?
            .next()
            .ok_or_else(|| PortError::not_found(address))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(5)))?;
        tracing::debug!(address, telnet, "tcp port connected");

        Ok(Self {
            stream,
            name: address.to_string(),
            telnet,
            pending: Vec::new(),
        })
    }

    /// Strip telnet commands from `raw`, queueing refusals for the peer.
    /// Returns the plain data bytes.
    fn filter_telnet(&mut self, raw: &[u8], replies: &mut Vec<u8>) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(raw);

        let mut data = Vec::with_capacity(input.len());
        let mut i = 0;
        while i < input.len() {
            if input[i] != IAC {
                data.push(input[i]);
                i += 1;
                continue;
            }
            let Some(&cmd) = input.get(i + 1) else {
                break;
            };
            match cmd {
                IAC => {
                    data.push(IAC);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    let Some(&opt) = input.get(i + 2) else {
                        break;
                    };
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, opt]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, opt]),
                        _ => {}
                    }
                    i += 3;
                }
                SB => match input[i..].windows(2).position(|w| w == [IAC, SE]) {
                    Some(end) => i += end + 2,
                    None => break,
                },
                _ => i += 2,
            }
        }
        self.pending = input[i..].to_vec();
        data
    }
}

impl SerialPortAdapter for TcpPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.stream.write(data).map_err(PortError::Io)
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut raw = vec![0u8; buffer.len()];
        let n = self.stream.read(&mut raw)?;
        if n == 0 {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection", self.name),
            )));
        }
        if !self.telnet {
            buffer[..n].copy_from_slice(&raw[..n]);
            return Ok(n);
        }

        let mut replies = Vec::new();
        let data = self.filter_telnet(&raw[..n], &mut replies);
        if !replies.is_empty() {
            self.stream.write_all(&replies)?;
        }
        if data.is_empty() {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "telnet negotiation only",
            )));
        }
        buffer[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        // A zero timeout means "block forever" for std sockets.
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout.max(Duration::from_secs(1))))?;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        self.pending.clear();
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 1024];
        let drained = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(PortError::Io(e)),
            }
        };
        self.stream.set_nonblocking(false)?;
        drained
    }
}

impl std::fmt::Debug for TcpPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPort")
            .field("name", &self.name)
            .field("telnet", &self.telnet)
            .finish()
    }
}
