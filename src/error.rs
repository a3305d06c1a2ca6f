//! Error types for the instrument protocol core.
//!
//! `LabError` is the single error type returned by every transport, framing,
//! decoding and session operation. Built on `thiserror`, it separates failures
//! by who caused them so that callers can pick a policy per kind:
//!
//! - **`ArgumentOutOfRange`**: a caller bug. The command was rejected before
//!   anything was written to the line.
//! - **`TransportTimeout`**: no complete response line arrived within the read
//!   bound.
//! - **`Protocol`**: the exchange itself was malformed (short read, missing
//!   frame header, wrong line count).
//! - **`Decode`**: the exchange was well formed but the payload did not have
//!   the shape the command declared.
//! - **`Device`**: the instrument reported a fault through its own status
//!   mechanism. See [`DeviceError`].
//!
//! The remaining variants cover bring-up and ambient concerns: opening the
//! port, configuration, raw I/O and the opaque spectrometer driver.
//!
//! Nothing in this crate retries. A timed-out motion command may already have
//! moved the hardware, so every failure goes straight back to the caller.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LabResult<T> = std::result::Result<T, LabError>;

/// A fault reported by the instrument itself.
///
/// Device errors are recoverable: the session stays usable and the caller
/// decides whether to continue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("device error {code}: {message}")]
pub struct DeviceError {
    /// Numeric code as reported by the device.
    pub code: u8,
    /// Human readable message looked up from the dialect's code table.
    pub message: String,
}

impl DeviceError {
    /// Creates a device error from a code and message.
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LabError {
    #[error("argument '{name}' = {value} out of range [{min}, {max}]")]
    ArgumentOutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("no response on '{port}' within {timeout:?}")]
    TransportTimeout { port: String, timeout: Duration },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cannot decode {field} from payload {payload:?}")]
    Decode {
        field: &'static str,
        payload: String,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to open serial port '{port}': {reason}")]
    Connection { port: String, reason: String },

    #[error("I/O error on '{port}': {source}")]
    Io {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Spectrometer driver error: {0}")]
    Driver(#[source] anyhow::Error),
}

impl LabError {
    /// Builds a decode error for the named field.
    pub fn decode(field: &'static str, payload: impl Into<String>) -> Self {
        LabError::Decode {
            field,
            payload: payload.into(),
        }
    }

    /// True when the read bound expired before a response arrived.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LabError::TransportTimeout { .. })
    }

    /// The device fault carried by this error, if any.
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            LabError::Device(err) => Some(err),
            _ => None,
        }
    }
}
