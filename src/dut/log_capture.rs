//! Received-output capture as a port decorator.

use crate::port::{PortError, SerialPortAdapter};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where captured output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to this file, creating parent directories.
    File(PathBuf),
    /// Emit complete lines as `tracing` debug events.
    Tracing,
}

impl LogTarget {
    pub fn from_option(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Tracing, Self::File)
    }
}

/// Wraps a port and records everything read from it.
///
/// Output is line-buffered: complete lines are written as they arrive, each
/// block preceded by a `[timestamp]` header. A trailing partial line is
/// written once the port has been idle for five read intervals, and on drop.
pub struct LoggedPort<P> {
    inner: P,
    name: String,
    file: Option<File>,
    line_cache: Vec<u8>,
    last_rx: Instant,
    idle_flush: Duration,
}

impl<P: SerialPortAdapter> LoggedPort<P> {
    pub fn new(inner: P, target: LogTarget, read_interval: Duration) -> Result<Self, PortError> {
        let file = match &target {
            LogTarget::File(path) => Some(open_log(path, inner.name())?),
            LogTarget::Tracing => None,
        };
        Ok(Self {
            name: inner.name().to_string(),
            inner,
            file,
            line_cache: Vec::new(),
            last_rx: Instant::now(),
            idle_flush: read_interval * 5,
        })
    }

    fn record(&mut self, data: &[u8]) {
        let now = Instant::now();
        if !data.is_empty() {
            self.line_cache.extend_from_slice(data);
            self.last_rx = now;
        }

        let block: Vec<u8> = match memchr::memrchr(b'\n', &self.line_cache) {
            Some(pos) => self.line_cache.drain(..=pos).collect(),
            None if !self.line_cache.is_empty()
                && now.duration_since(self.last_rx) >= self.idle_flush =>
            {
                std::mem::take(&mut self.line_cache)
            }
            None => return,
        };
        self.emit(&block);
    }
}

impl<P> LoggedPort<P> {
    fn emit(&mut self, block: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            for line in String::from_utf8_lossy(block).lines() {
                debug!(port = %self.name, "{line}");
            }
            return;
        };
        let header = format!("\n[{}]\n", timestamp());
        let written = file
            .write_all(header.as_bytes())
            .and_then(|_| file.write_all(block))
            .and_then(|_| file.flush());
        if let Err(e) = written {
            warn!(port = %self.name, "failed to write port log: {e}");
        }
    }
}

fn open_log(path: &Path, name: &str) -> Result<File, PortError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "--------- Saving {name} logs to this file --------")?;
    debug!(port = name, log = %path.display(), "capturing port output");
    Ok(file)
}

fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

impl<P: SerialPortAdapter> SerialPortAdapter for LoggedPort<P> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.inner.write_bytes(data)
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        match self.inner.read_bytes(buffer) {
            Ok(n) => {
                self.record(&buffer[..n]);
                Ok(n)
            }
            Err(e) if e.is_no_data() => {
                self.record(&[]);
                Err(e)
            }
            Err(e) => {
                self.record(format!("PortError: {e}\n").as_bytes());
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.inner.set_timeout(timeout)
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        self.inner.clear_buffers()
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<(), PortError> {
        self.inner.write_request_to_send(level)
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> Result<(), PortError> {
        self.inner.write_data_terminal_ready(level)
    }
}

impl<P> Drop for LoggedPort<P> {
    fn drop(&mut self) {
        if self.line_cache.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.line_cache);
        self.emit(&rest);
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for LoggedPort<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggedPort")
            .field("inner", &self.inner)
            .field("to_file", &self.file.is_some())
            .field("pending", &self.line_cache.len())
            .finish()
    }
}
