//! Mock port implementation for testing.
//!
//! Provides a `MockSerialPort` that simulates device behavior without real
//! hardware: queued and time-delayed output, scripted replies to requests,
//! write logging and modem-line recording.

use super::error::PortError;
use super::traits::SerialPortAdapter;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Inner state of the mock port, protected by a mutex for interior mutability.
#[derive(Debug, Default)]
struct MockPortState {
    /// Bytes ready to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Output that becomes readable at a later instant, ordered by due time.
    scheduled: VecDeque<(Instant, Vec<u8>)>,
    /// Scripted replies: when a write equals the request, the reply is queued.
    replies: Vec<(Vec<u8>, Vec<u8>)>,
    /// Log of all bytes written to the port.
    write_log: Vec<Vec<u8>>,
    /// Levels written to RTS, in order.
    rts_log: Vec<bool>,
    /// Levels written to DTR, in order.
    dtr_log: Vec<bool>,
    /// Whether the next operation should time out.
    should_timeout: bool,
    /// Whether reads fail as if the device was unplugged.
    disconnected: bool,
    /// Configured timeout duration.
    timeout: Duration,
    /// Whether buffers have been cleared.
    buffers_cleared: bool,
}

impl MockPortState {
    fn promote_due(&mut self, now: Instant) {
        while let Some((due, _)) = self.scheduled.front() {
            if *due > now {
                break;
            }
            if let Some((_, data)) = self.scheduled.pop_front() {
                self.read_queue.extend(data);
            }
        }
    }
}

/// Mock port for tests.
///
/// Clones share state, so a test can keep one handle to drive the device side
/// while another is owned by the code under test.
///
/// # Example
/// ```
/// use esptest::port::{MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
/// port.enqueue_read(b"Hello");
///
/// let mut buffer = [0u8; 8];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"Hello");
///
/// port.write_bytes(b"Response").unwrap();
/// assert_eq!(port.get_write_log(), vec![b"Response".to_vec()]);
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new mock port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState {
                timeout: Duration::from_millis(5),
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockPortState> {
        // A panicking test thread must not wedge the other handle.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue bytes to be returned by subsequent read operations.
    pub fn enqueue_read(&mut self, data: &[u8]) {
        self.state().read_queue.extend(data);
    }

    /// Make `data` readable `delay` from now.
    pub fn enqueue_read_after(&mut self, data: &[u8], delay: Duration) {
        let due = Instant::now() + delay;
        let mut state = self.state();
        let pos = state
            .scheduled
            .iter()
            .position(|(d, _)| *d > due)
            .unwrap_or(state.scheduled.len());
        state.scheduled.insert(pos, (due, data.to_vec()));
    }

    /// Queue `reply` whenever exactly `request` is written.
    pub fn respond_to(&mut self, request: &[u8], reply: &[u8]) {
        self.state().replies.push((request.to_vec(), reply.to_vec()));
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state().write_log.clone()
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state().write_log.concat()
    }

    /// Clear the write log.
    pub fn clear_write_log(&mut self) {
        self.state().write_log.clear();
    }

    /// Levels written to RTS so far.
    pub fn rts_log(&self) -> Vec<bool> {
        self.state().rts_log.clone()
    }

    /// Levels written to DTR so far.
    pub fn dtr_log(&self) -> Vec<bool> {
        self.state().dtr_log.clone()
    }

    /// Set whether the next read/write operation should time out.
    pub fn set_should_timeout(&mut self, should_timeout: bool) {
        self.state().should_timeout = should_timeout;
    }

    /// Simulate an unplugged device: every read and write fails.
    pub fn set_disconnected(&mut self, disconnected: bool) {
        self.state().disconnected = disconnected;
    }

    /// Get whether buffers have been cleared since creation.
    pub fn was_cleared(&self) -> bool {
        self.state().buffers_cleared
    }

    /// Get the number of bytes available to read right now.
    pub fn available_bytes(&self) -> usize {
        let mut state = self.state();
        state.promote_due(Instant::now());
        state.read_queue.len()
    }

    fn broken_pipe(&self) -> PortError {
        PortError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{} disconnected", self.name),
        ))
    }
}

impl SerialPortAdapter for MockSerialPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state();
        if state.disconnected {
            drop(state);
            return Err(self.broken_pipe());
        }
        if state.should_timeout {
            state.should_timeout = false;
            return Err(PortError::timeout(state.timeout));
        }

        state.write_log.push(data.to_vec());
        let reply = state
            .replies
            .iter()
            .find(|(request, _)| request.as_slice() == data)
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = reply {
            state.read_queue.extend(reply);
        }

        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let started = Instant::now();
        loop {
            let mut state = self.state();
            if state.disconnected {
                drop(state);
                return Err(self.broken_pipe());
            }
            if state.should_timeout {
                state.should_timeout = false;
                return Err(PortError::timeout(state.timeout));
            }

            let now = Instant::now();
            state.promote_due(now);

            if !state.read_queue.is_empty() {
                let n = buffer.len().min(state.read_queue.len());
                for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            // Nothing scheduled: behave like a non-blocking source.
            let Some(&(due, _)) = state.scheduled.front() else {
                return Err(PortError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "No data available",
                )));
            };

            let deadline = started + state.timeout;
            if now >= deadline {
                return Err(PortError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timed out",
                )));
            }
            let wait = due.min(deadline) - now;
            drop(state);
            std::thread::sleep(wait);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.state().timeout = timeout;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        let mut state = self.state();
        state.promote_due(Instant::now());
        state.read_queue.clear();
        state.buffers_cleared = true;
        Ok(())
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<(), PortError> {
        self.state().rts_log.push(level);
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> Result<(), PortError> {
        self.state().dtr_log.push(level);
        Ok(())
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}
