//! Exclusive port claims.
//!
//! Each physical port maps to exactly one instrument session. A [`PortClaim`]
//! records that a port is in use and releases it when dropped, so opening a
//! second session on the same port fails at open time instead of interleaving
//! two conversations on one line.

use crate::error::LabError;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::trace;

static CLAIMED_PORTS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn claimed_ports() -> std::sync::MutexGuard<'static, HashSet<String>> {
    // A poisoned set is still a valid set of names.
    CLAIMED_PORTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RAII guard marking a port as owned by one transport.
#[derive(Debug)]
pub struct PortClaim {
    port: String,
}

impl PortClaim {
    /// Claims `port`, failing if it is already claimed in this process.
    pub fn acquire(port: &str) -> Result<Self, LabError> {
        if !claimed_ports().insert(port.to_string()) {
            return Err(LabError::Configuration(format!(
                "serial port '{}' is already owned by another session",
                port
            )));
        }
        trace!(port, "port claimed");
        Ok(Self {
            port: port.to_string(),
        })
    }

    /// True if some live claim holds `port`.
    pub fn is_claimed(port: &str) -> bool {
        claimed_ports().contains(port)
    }

    /// The claimed port name.
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        claimed_ports().remove(&self.port);
        trace!(port = %self.port, "port released");
    }
}
