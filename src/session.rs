//! Instrument sessions and the command transaction.
//!
//! An [`InstrumentSession`] exclusively owns the [`Transport`] to one
//! instrument. Every call goes through [`InstrumentSession::transact`], which
//! holds the transport lock from the first byte written until the last line of
//! any status exchange has been read. Concurrent callers on the same session
//! therefore queue instead of interleaving on the wire.
//!
//! ## Transaction
//!
//! 1. Validate argument ranges. Nothing is written on failure.
//! 2. Encode and write the command.
//! 3. Wait out the command's settle window, if it declares one.
//! 4. Read the declared number of response lines and frame them.
//! 5. Decode the payload.
//! 6. Classify through the dialect (embedded status or side channel).
//!
//! Nothing is retried. Timeouts and protocol errors end the transaction and are
//! returned as is; the session stays open and the caller decides what to do.

use crate::error::{DeviceError, LabError};
use crate::protocol::{Command, DecodedValue, Dialect, Frame, Framer, ShutterState, Symbol, ValvePosition};
use crate::transport::Transport;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Locked access to a transport for the duration of one transaction.
///
/// Side-channel classifiers receive the link so that their status queries run
/// under the same lock as the command that triggered them.
pub struct Link<'a> {
    transport: &'a mut dyn Transport,
    framer: &'a dyn Framer,
    read_timeout: Duration,
}

impl<'a> Link<'a> {
    pub fn new(
        transport: &'a mut dyn Transport,
        framer: &'a dyn Framer,
        read_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            framer,
            read_timeout,
        }
    }

    /// Writes `command`, waits out its settle window and reads its response.
    pub async fn exchange(&mut self, command: &Command) -> Result<Frame, LabError> {
        let line = self.framer.encode(command);
        self.transport.write_line(&line).await?;

        let settle = command.settle_window();
        if !settle.is_zero() {
            debug!(verb = command.verb(), ?settle, "waiting for mechanics to settle");
            tokio::time::sleep(settle).await;
        }

        let mut lines = Vec::with_capacity(command.expected_lines());
        for _ in 0..command.expected_lines() {
            lines.push(self.transport.read_line(self.read_timeout).await?);
        }
        self.framer.frame(command, lines)
    }

    /// [`Link::exchange`] followed by decoding, without classification.
    pub async fn query(&mut self, command: &Command) -> Result<Option<DecodedValue>, LabError> {
        let frame = self.exchange(command).await?;
        command.decoder().apply(frame.payload.as_deref())
    }
}

/// Result of a completed transaction.
///
/// A device fault does not discard the decoded value: queries get both, and
/// write-only callers can look at [`Outcome::device_error`] alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub value: Option<DecodedValue>,
    pub device_error: Option<DeviceError>,
    /// Raw status byte for dialects that embed one in the response.
    pub status: Option<u8>,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        self.device_error.is_none()
    }

    /// Turns a device fault into [`LabError::Device`].
    pub fn into_result(self) -> Result<Option<DecodedValue>, LabError> {
        match self.device_error {
            Some(err) => Err(err.into()),
            None => Ok(self.value),
        }
    }

    /// Succeeds when the device reported no fault. For blind commands.
    pub fn into_unit(self) -> Result<(), LabError> {
        self.into_result().map(|_| ())
    }

    fn typed<T>(
        self,
        expected: &str,
        pick: impl FnOnce(&DecodedValue) -> Option<T>,
    ) -> Result<T, LabError> {
        let value = self.into_result()?;
        value.as_ref().and_then(pick).ok_or_else(|| {
            LabError::Protocol(format!("expected {} value, decoded {:?}", expected, value))
        })
    }

    pub fn integer(self) -> Result<i64, LabError> {
        self.typed("an integer", DecodedValue::as_integer)
    }

    pub fn real(self) -> Result<f64, LabError> {
        self.typed("a real", DecodedValue::as_real)
    }

    pub fn text(self) -> Result<String, LabError> {
        self.typed("a text", |v| v.as_text().map(str::to_string))
    }

    pub fn shutter(self) -> Result<ShutterState, LabError> {
        self.typed("a shutter", |v| match v.as_symbol() {
            Some(Symbol::Shutter(state)) => Some(state),
            _ => None,
        })
    }

    pub fn valve(self) -> Result<ValvePosition, LabError> {
        self.typed("a valve", |v| match v.as_symbol() {
            Some(Symbol::Valve(position)) => Some(position),
            _ => None,
        })
    }
}

/// Exclusive owner of one instrument's transport.
pub struct InstrumentSession {
    id: String,
    port: String,
    dialect: Dialect,
    transport: Mutex<Box<dyn Transport>>,
    read_timeout: Duration,
}

impl InstrumentSession {
    pub fn new(
        id: impl Into<String>,
        dialect: Dialect,
        transport: impl Transport + 'static,
        read_timeout: Duration,
    ) -> Self {
        let id = id.into();
        let port = transport.port().to_string();
        info!(instrument = %id, port = %port, dialect = dialect.name(), "session opened");
        Self {
            id,
            port,
            dialect,
            transport: Mutex::new(Box::new(transport)),
            read_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Runs one command transaction.
    ///
    /// Returns `Err` for argument, transport, protocol and decode failures.
    /// Device faults come back inside the [`Outcome`]. When the payload cannot
    /// be decoded the status is still read so that the wire stays in step, and
    /// the decode error is returned.
    pub async fn transact(&self, command: &Command) -> Result<Outcome, LabError> {
        command.validate()?;

        let mut transport = self.transport.lock().await;
        let mut link = Link::new(&mut **transport, self.dialect.framer(), self.read_timeout);

        debug!(instrument = %self.id, verb = command.verb(), "transaction started");
        let frame = link.exchange(command).await?;
        let decoded = command.decoder().apply(frame.payload.as_deref());
        let device_error = self.dialect.classifier().classify(&frame, &mut link).await?;
        drop(transport);

        match decoded {
            Ok(value) => Ok(Outcome {
                value,
                device_error,
                status: frame.status,
            }),
            Err(err) => {
                if let Some(fault) = device_error {
                    warn!(
                        instrument = %self.id,
                        verb = command.verb(),
                        code = fault.code,
                        message = %fault.message,
                        "device fault alongside undecodable payload"
                    );
                }
                Err(err)
            }
        }
    }

    /// One exchange and decode without classification.
    ///
    /// Used for the status queries themselves, which must not trigger another
    /// status exchange.
    pub async fn query_unclassified(
        &self,
        command: &Command,
    ) -> Result<Option<DecodedValue>, LabError> {
        command.validate()?;
        let mut transport = self.transport.lock().await;
        Link::new(&mut **transport, self.dialect.framer(), self.read_timeout)
            .query(command)
            .await
    }

    /// Releases the transport and its port claim.
    pub async fn close(self) {
        let transport = self.transport.into_inner();
        drop(transport);
        info!(instrument = %self.id, port = %self.port, "session closed");
    }
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("dialect", &self.dialect)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}
