//! Newport Cornerstone 130 monochromator.
//!
//! RS-232, 9600 8N1, `\n` terminated. The session is opened with handshaking
//! disabled (`HANDSHAKE 0`), after which the device echoes each command and
//! reports faults only through `STB?` / `ERROR?`.
//!
//! ## Configuration
//!
//! ```toml
//! [[instruments]]
//! id = "mono"
//! kind = "monochromator"
//! port = "/dev/ttyUSB0"
//! grating_settle = "12s"
//! ```

use crate::config::{InstrumentDefinition, InstrumentKind};
use crate::error::{DeviceError, LabError};
use crate::protocol::cornerstone::{self, error_message};
use crate::protocol::{Arg, Command, Decode, Dialect, ShutterState};
use crate::session::{InstrumentSession, Outcome};
use crate::transport::Transport;
#[cfg(feature = "instrument_serial")]
use crate::transport::{open_serial, ConnectionParams};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::info;

/// Reachable wavelengths in nm.
pub const WAVELENGTH_RANGE: RangeInclusive<i64> = 0..=1600;
/// Relative step counts accepted by `STEP`.
pub const STEP_RANGE: RangeInclusive<i64> = -9999..=9999;
pub const GRATING_RANGE: RangeInclusive<i64> = 1..=2;
pub const FILTER_RANGE: RangeInclusive<i64> = 1..=6;

/// Time the turret needs after `GRAT n` before the device answers sensibly.
pub const DEFAULT_GRATING_SETTLE: Duration = Duration::from_secs(12);

/// Command table.
pub mod commands {
    use super::*;

    /// Disables the handshake characters so every command is simply echoed.
    pub fn handshake_off() -> Command {
        Command::new("HANDSHAKE").int_arg("handshake", 0, 0..=1)
    }

    pub fn wavelength() -> Command {
        Command::new("WAVE?")
            .response_lines(2)
            .decode(Decode::TruncatedReal {
                field: "wavelength",
                width: 7,
            })
    }

    pub fn go_wavelength(nm: i64) -> Command {
        Command::new("GOWAVE").int_arg("wavelength", nm, WAVELENGTH_RANGE)
    }

    pub fn step() -> Command {
        Command::new("STEP?")
            .response_lines(2)
            .decode(Decode::Integer {
                field: "step",
                width: 4,
            })
    }

    pub fn set_step(steps: i64) -> Command {
        Command::new("STEP").int_arg("step", steps, STEP_RANGE)
    }

    pub fn grating() -> Command {
        Command::new("GRAT?").response_lines(2).decode(Decode::Grating)
    }

    pub fn set_grating(grating: i64, settle: Duration) -> Command {
        Command::new("GRAT")
            .int_arg("grating", grating, GRATING_RANGE)
            .settle(settle)
    }

    pub fn shutter() -> Command {
        Command::new("SHUTTER?").response_lines(2).decode(Decode::Shutter)
    }

    pub fn set_shutter(state: ShutterState) -> Command {
        Command::new("SHUTTER").arg(Arg::Token(state.token()))
    }

    pub fn filter() -> Command {
        Command::new("FILTER?")
            .response_lines(2)
            .decode(Decode::Digit { field: "filter" })
    }

    pub fn set_filter(filter: i64) -> Command {
        Command::new("FILTER").int_arg("filter", filter, FILTER_RANGE)
    }

    pub fn info() -> Command {
        Command::new("INFO?")
            .response_lines(2)
            .decode(Decode::Text { field: "info" })
    }

    pub fn abort() -> Command {
        Command::new("ABORT")
    }
}

/// Cornerstone 130 on an open session.
#[derive(Debug)]
pub struct Monochromator {
    session: InstrumentSession,
    grating_settle: Duration,
}

impl Monochromator {
    /// Wraps `transport` in a Cornerstone session and disables handshaking.
    ///
    /// A fault during the handshake fails the open; the transport (and its
    /// port claim) is released with the returned error.
    pub async fn open(
        id: impl Into<String>,
        transport: impl Transport + 'static,
        read_timeout: Duration,
    ) -> Result<Self, LabError> {
        let session = InstrumentSession::new(id, Dialect::cornerstone(), transport, read_timeout);
        session.transact(&commands::handshake_off()).await?.into_unit()?;
        info!(instrument = %session.id(), "monochromator ready");
        Ok(Self {
            session,
            grating_settle: DEFAULT_GRATING_SETTLE,
        })
    }

    /// Opens the serial port described by `params` and runs [`Monochromator::open`].
    #[cfg(feature = "instrument_serial")]
    pub async fn connect(id: impl Into<String>, params: &ConnectionParams) -> Result<Self, LabError> {
        let transport = open_serial(params)?;
        Self::open(id, transport, params.read_timeout).await
    }

    /// Opens a configured monochromator on an already opened transport, using
    /// the entry's id, read timeout and grating settle window.
    pub async fn open_configured(
        definition: &InstrumentDefinition,
        transport: impl Transport + 'static,
    ) -> Result<Self, LabError> {
        definition.require(InstrumentKind::Monochromator)?;
        let mono = Self::open(definition.id.as_str(), transport, definition.read_timeout).await?;
        Ok(mono.with_grating_settle(definition.grating_settle))
    }

    /// Opens the serial port named by a configuration entry.
    #[cfg(feature = "instrument_serial")]
    pub async fn from_config(definition: &InstrumentDefinition) -> Result<Self, LabError> {
        definition.require(InstrumentKind::Monochromator)?;
        let transport = open_serial(&definition.connection_params()?)?;
        Self::open_configured(definition, transport).await
    }

    /// Overrides the grating settle window.
    pub fn with_grating_settle(mut self, settle: Duration) -> Self {
        self.grating_settle = settle;
        self
    }

    pub fn grating_settle(&self) -> Duration {
        self.grating_settle
    }

    pub fn session(&self) -> &InstrumentSession {
        &self.session
    }

    async fn run(&self, command: Command) -> Result<Outcome, LabError> {
        self.session.transact(&command).await
    }

    /// Current wavelength, truncated to whole nm.
    pub async fn wavelength(&self) -> Result<i64, LabError> {
        self.run(commands::wavelength()).await?.integer()
    }

    pub async fn set_wavelength(&self, nm: i64) -> Result<(), LabError> {
        self.run(commands::go_wavelength(nm)).await?.into_unit()
    }

    pub async fn step(&self) -> Result<i64, LabError> {
        self.run(commands::step()).await?.integer()
    }

    pub async fn set_step(&self, steps: i64) -> Result<(), LabError> {
        self.run(commands::set_step(steps)).await?.into_unit()
    }

    pub async fn grating(&self) -> Result<i64, LabError> {
        self.run(commands::grating()).await?.integer()
    }

    /// Selects a grating and blocks this transaction for the settle window.
    pub async fn set_grating(&self, grating: i64) -> Result<(), LabError> {
        self.run(commands::set_grating(grating, self.grating_settle))
            .await?
            .into_unit()
    }

    pub async fn shutter(&self) -> Result<ShutterState, LabError> {
        self.run(commands::shutter()).await?.shutter()
    }

    pub async fn set_shutter(&self, state: ShutterState) -> Result<(), LabError> {
        self.run(commands::set_shutter(state)).await?.into_unit()
    }

    pub async fn open_shutter(&self) -> Result<(), LabError> {
        self.set_shutter(ShutterState::Open).await
    }

    pub async fn close_shutter(&self) -> Result<(), LabError> {
        self.set_shutter(ShutterState::Closed).await
    }

    pub async fn filter(&self) -> Result<i64, LabError> {
        self.run(commands::filter()).await?.integer()
    }

    pub async fn set_filter(&self, filter: i64) -> Result<(), LabError> {
        self.run(commands::set_filter(filter)).await?.into_unit()
    }

    /// Identification string (model, firmware).
    pub async fn info(&self) -> Result<String, LabError> {
        self.run(commands::info()).await?.text()
    }

    /// Stops any motion in progress.
    pub async fn abort(&self) -> Result<(), LabError> {
        self.run(commands::abort()).await?.into_unit()
    }

    /// Raw status byte (first digit), without the follow-up error query.
    pub async fn status_byte(&self) -> Result<u8, LabError> {
        self.read_code(&cornerstone::status_query()).await
    }

    /// Queries `ERROR?` directly. Reading the error clears it on the device.
    pub async fn last_error(&self) -> Result<DeviceError, LabError> {
        let code = self.read_code(&cornerstone::error_query()).await?;
        Ok(DeviceError::new(code, error_message(code)))
    }

    async fn read_code(&self, command: &Command) -> Result<u8, LabError> {
        let value = self
            .session
            .query_unclassified(command)
            .await?
            .and_then(|v| v.as_integer())
            .ok_or_else(|| LabError::Protocol(format!("'{}' returned no value", command.verb())))?;
        u8::try_from(value).map_err(|_| LabError::decode(command.decoder().field(), value.to_string()))
    }

    /// Closes the session and releases the port.
    pub async fn close(self) {
        self.session.close().await;
    }
}
