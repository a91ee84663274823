//! Process-wide registry of open device paths.
//!
//! A [`PortLease`] is held for as long as a handle owns a device. Acquiring a
//! second lease for the same path fails with [`PortError::Busy`]; dropping the
//! lease releases the path.

use super::error::PortError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;

static OPEN_PORTS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a device path within this process.
#[derive(Debug)]
pub struct PortLease {
    path: String,
}

impl PortLease {
    /// Claim `path`, failing if another lease for it is alive.
    pub fn acquire(path: &str) -> Result<Self, PortError> {
        let mut open = OPEN_PORTS.lock();
        if !open.insert(path.to_string()) {
            return Err(PortError::busy(path));
        }
        Ok(Self {
            path: path.to_string(),
        })
    }

    /// The leased device path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether any lease for `path` is currently held.
    pub fn is_held(path: &str) -> bool {
        OPEN_PORTS.lock().contains(path)
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        OPEN_PORTS.lock().remove(&self.path);
    }
}
