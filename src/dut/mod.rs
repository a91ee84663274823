//! Device-under-test abstraction.
//!
//! A [`Dut`] is a byte stream with expect semantics: writes go straight to the
//! device, reads land in an internal buffer that [`Dut::expect`] searches with a
//! deadline. [`SerialDut`] implements it over any [`SerialPortAdapter`], and
//! [`LoggedPort`] adds log capture underneath without touching the DUT.
//!
//! [`SerialPortAdapter`]: crate::port::SerialPortAdapter

mod log_capture;
mod serial_dut;

pub use log_capture::{LogTarget, LoggedPort};
pub use serial_dut::{Connector, SerialDut, DEFAULT_READ_INTERVAL, MAX_BUFFER};

use crate::port::PortError;
use memchr::memmem;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by DUT operations.
#[derive(Debug, Error)]
pub enum DutError {
    /// The pattern was not seen before the deadline.
    #[error("{name}: timed out after {timeout:?} waiting for {pattern}, last output: {tail:?}")]
    Timeout {
        name: String,
        pattern: String,
        timeout: Duration,
        /// Last unmatched bytes, lossily decoded.
        tail: String,
    },

    /// The device is already held by another handle.
    #[error("Port {0} is busy")]
    PortBusy(String),

    #[error("DUT {0} is not open")]
    NotOpen(String),

    #[error(transparent)]
    Port(PortError),
}

impl From<PortError> for DutError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::Busy(name) => Self::PortBusy(name),
            other => Self::Port(other),
        }
    }
}

impl DutError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// What [`Dut::expect`] looks for.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal byte string.
    Exact(Vec<u8>),
    /// Byte regex; `(?s)` is needed for `.` to cross newlines.
    Regex(regex::bytes::Regex),
}

/// Location of a pattern inside a buffer.
#[derive(Debug)]
pub(crate) struct Located {
    pub start: usize,
    pub end: usize,
    pub groups: Vec<Option<Vec<u8>>>,
}

impl Pattern {
    pub fn exact(text: impl AsRef<[u8]>) -> Self {
        Self::Exact(text.as_ref().to_vec())
    }

    pub fn regex(re: &str) -> Result<Self, regex::Error> {
        regex::bytes::Regex::new(re).map(Self::Regex)
    }

    pub(crate) fn locate(&self, haystack: &[u8]) -> Option<Located> {
        match self {
            Self::Exact(needle) => memmem::find(haystack, needle).map(|start| Located {
                start,
                end: start + needle.len(),
                groups: Vec::new(),
            }),
            Self::Regex(re) => re.captures(haystack).and_then(|caps| {
                let whole = caps.get(0)?;
                Some(Located {
                    start: whole.start(),
                    end: whole.end(),
                    groups: caps
                        .iter()
                        .skip(1)
                        .map(|g| g.map(|m| m.as_bytes().to_vec()))
                        .collect(),
                })
            }),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::exact(text)
    }
}

impl From<&[u8]> for Pattern {
    fn from(bytes: &[u8]) -> Self {
        Self::exact(bytes)
    }
}

impl From<regex::bytes::Regex> for Pattern {
    fn from(re: regex::bytes::Regex) -> Self {
        Self::Regex(re)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// A successful [`Dut::expect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// The matched bytes.
    pub matched: Vec<u8>,
    /// Regex capture groups (empty for exact patterns).
    pub groups: Vec<Option<Vec<u8>>>,
    /// Bytes consumed ahead of the match.
    pub before: Vec<u8>,
}

impl ExpectMatch {
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.matched)
    }

    /// Capture group `index`, 1-based like regex groups.
    pub fn group(&self, index: usize) -> Option<&[u8]> {
        index
            .checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .and_then(|g| g.as_deref())
    }

    pub fn group_str(&self, index: usize) -> Option<Cow<'_, str>> {
        self.group(index).map(String::from_utf8_lossy)
    }
}

/// Capability set of a device under test.
pub trait Dut {
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Acquire the device. Fails with [`DutError::PortBusy`] if any handle
    /// already holds it.
    fn open(&mut self) -> Result<(), DutError>;

    fn write(&mut self, data: &[u8]) -> Result<(), DutError>;

    /// Write `line` followed by `\n`.
    fn write_line(&mut self, line: &str) -> Result<(), DutError> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data)
    }

    /// Return buffered output, or wait up to `timeout` for the first data.
    /// An empty result means nothing arrived.
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, DutError>;

    /// Block until `pattern` appears or `timeout` passes.
    ///
    /// Input up to the end of the match is consumed; the rest stays buffered.
    fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> Result<ExpectMatch, DutError>;

    /// [`Dut::expect`] for a literal string.
    fn expect_exact(&mut self, text: &str, timeout: Duration) -> Result<ExpectMatch, DutError> {
        self.expect(&Pattern::exact(text), timeout)
    }

    /// Hardware reset, discarding buffered input.
    fn reset(&mut self) -> Result<(), DutError>;

    /// Release the device. Safe to call repeatedly.
    fn close(&mut self);
}
