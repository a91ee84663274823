//! DUT backed by a [`SerialPortAdapter`].

use super::log_capture::{LogTarget, LoggedPort};
use super::{Dut, DutError, ExpectMatch, Pattern};
use crate::port::{PortConfiguration, PortError, PortLease, SerialPortAdapter, SyncSerialPort};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Poll granularity for port reads.
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(5);

/// Upper bound on buffered unmatched input; the oldest bytes go first.
pub const MAX_BUFFER: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;
const TAIL_LEN: usize = 200;
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Opens the underlying port on [`Dut::open`].
pub type Connector<P> = Box<dyn FnMut() -> Result<P, PortError> + Send>;

/// A device under test reached through a port.
///
/// Holds a [`PortLease`] on its name while open, so a second handle for the
/// same device fails with [`DutError::PortBusy`]. Dropping the DUT closes it.
pub struct SerialDut<P: SerialPortAdapter> {
    name: String,
    connector: Connector<P>,
    port: Option<P>,
    lease: Option<PortLease>,
    buffer: Vec<u8>,
    read_interval: Duration,
    port_timeout: Option<Duration>,
}

impl SerialDut<SyncSerialPort> {
    /// A DUT on serial device `path`, not yet opened.
    pub fn serial(path: &str, config: PortConfiguration) -> Self {
        let device = path.to_string();
        Self::new(path, Box::new(move || SyncSerialPort::open(&device, config.clone())))
    }
}

impl SerialDut<LoggedPort<SyncSerialPort>> {
    /// A serial DUT whose received output is captured to `log`.
    pub fn serial_logged(path: &str, config: PortConfiguration, log: LogTarget) -> Self {
        let device = path.to_string();
        let interval = DEFAULT_READ_INTERVAL;
        Self::new(
            path,
            Box::new(move || {
                let port = SyncSerialPort::open(&device, config.clone())?;
                LoggedPort::new(port, log.clone(), interval)
            }),
        )
    }
}

impl<P: SerialPortAdapter> SerialDut<P> {
    /// A DUT named `name` (also the lease key) whose port comes from
    /// `connector`.
    pub fn new(name: impl Into<String>, connector: Connector<P>) -> Self {
        Self {
            name: name.into(),
            connector,
            port: None,
            lease: None,
            buffer: Vec::new(),
            read_interval: DEFAULT_READ_INTERVAL,
            port_timeout: None,
        }
    }

    /// Wrap an already-open port. The lease is taken immediately.
    pub fn from_port(port: P) -> Result<Self, DutError> {
        let name = port.name().to_string();
        let lease = PortLease::acquire(&name)?;
        let mut slot = Some(port);
        let mut dut = Self::new(
            name.clone(),
            Box::new(move || slot.take().ok_or_else(|| PortError::not_found(name.clone()))),
        );
        dut.port = (dut.connector)().ok();
        dut.lease = Some(lease);
        Ok(dut)
    }

    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Open and return self, for construct-and-open call sites.
    pub fn opened(mut self) -> Result<Self, DutError> {
        self.open()?;
        Ok(self)
    }

    /// Unconsumed buffered input.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Take everything buffered plus whatever the port has ready, without
    /// waiting for new output.
    pub fn flush_data(&mut self) -> Result<Vec<u8>, DutError> {
        while self.fill(Duration::from_millis(1))? > 0 {}
        Ok(std::mem::take(&mut self.buffer))
    }

    fn port(&mut self) -> Result<&mut P, DutError> {
        self.port
            .as_mut()
            .ok_or_else(|| DutError::NotOpen(self.name.clone()))
    }

    /// One bounded port read into the buffer. Returns the number of new
    /// bytes; "no data" is `Ok(0)` after roughly `wait`.
    fn fill(&mut self, wait: Duration) -> Result<usize, DutError> {
        let started = Instant::now();
        let wait = wait.max(Duration::from_millis(1));
        if self.port_timeout != Some(wait) {
            self.port()?.set_timeout(wait)?;
            self.port_timeout = Some(wait);
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.port()?.read_bytes(&mut chunk) {
            Ok(n) => {
                trace!(dut = %self.name, bytes = n, "rx");
                self.push(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.is_no_data() => {
                // Non-blocking sources return early; keep the poll cadence.
                let spent = started.elapsed();
                if spent < wait {
                    std::thread::sleep(wait - spent);
                }
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_BUFFER {
            let excess = self.buffer.len() - MAX_BUFFER;
            self.buffer.drain(..excess);
        }
    }

    fn take_match(&mut self, pattern: &Pattern) -> Option<ExpectMatch> {
        let found = pattern.locate(&self.buffer)?;
        let consumed: Vec<u8> = self.buffer.drain(..found.end).collect();
        Some(ExpectMatch {
            matched: consumed[found.start..].to_vec(),
            groups: found.groups,
            before: consumed[..found.start].to_vec(),
        })
    }

    fn tail(&self) -> String {
        let start = self.buffer.len().saturating_sub(TAIL_LEN);
        String::from_utf8_lossy(&self.buffer[start..]).into_owned()
    }
}

impl<P: SerialPortAdapter> Dut for SerialDut<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn open(&mut self) -> Result<(), DutError> {
        let lease = PortLease::acquire(&self.name)?;
        let port = (self.connector)()?;
        debug!(dut = %self.name, "opened");
        self.port = Some(port);
        self.lease = Some(lease);
        self.port_timeout = None;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), DutError> {
        trace!(dut = %self.name, bytes = data.len(), "tx");
        self.port()?.write_all_bytes(data)?;
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, DutError> {
        self.port()?;
        let deadline = Instant::now() + timeout;
        while self.buffer.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.fill(self.read_interval.min(deadline - now))?;
        }
        Ok(std::mem::take(&mut self.buffer))
    }

    fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> Result<ExpectMatch, DutError> {
        self.port()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.take_match(pattern) {
                debug!(dut = %self.name, %pattern, "matched");
                return Ok(found);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DutError::Timeout {
                    name: self.name.clone(),
                    pattern: pattern.to_string(),
                    timeout,
                    tail: self.tail(),
                });
            }
            self.fill(self.read_interval.min(deadline - now))?;
        }
    }

    fn reset(&mut self) -> Result<(), DutError> {
        let port = self.port()?;
        port.write_data_terminal_ready(false)?;
        port.write_request_to_send(true)?;
        std::thread::sleep(RESET_PULSE);
        // Drop pre-reset output while EN is still held low.
        port.clear_buffers()?;
        port.write_request_to_send(false)?;
        self.buffer.clear();
        debug!(dut = %self.name, "hard reset");
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(dut = %self.name, "closed");
        }
        self.lease = None;
        self.buffer.clear();
        self.port_timeout = None;
    }
}

impl<P: SerialPortAdapter> Drop for SerialDut<P> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: SerialPortAdapter> std::fmt::Debug for SerialDut<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDut")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("buffered", &self.buffer.len())
            .field("read_interval", &self.read_interval)
            .finish()
    }
}
