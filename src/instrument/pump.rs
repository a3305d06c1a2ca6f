//! Tecan Cavro XLP6000 syringe pump.
//!
//! RS-232, 9600 8N1. Commands are addressed (`/1` for the first pump) and are
//! only executed once the trailing `R` arrives. Every response carries the
//! status byte, so there is no separate status round trip.
//!
//! The pump must be initialised (`Z`, `Y` or the simulated `z`) before it will
//! accept moves; until then it answers with error 7. Opening a session does not
//! initialise it, since initialisation drives the plunger.

use crate::config::{InstrumentDefinition, InstrumentKind};
use crate::error::LabError;
use crate::protocol::xlp6000::{self, PumpStatus};
use crate::protocol::{Command, Decode, Dialect, ValvePosition};
use crate::session::{InstrumentSession, Outcome};
use crate::transport::Transport;
#[cfg(feature = "instrument_serial")]
use crate::transport::{open_serial, ConnectionParams};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::info;

/// Default address of a single pump.
pub const DEFAULT_ADDRESS: char = '1';

/// Plunger increments in standard resolution.
pub const POSITION_RANGE: RangeInclusive<i64> = 0..=48000;
pub const TOP_SPEED_RANGE: RangeInclusive<i64> = 5..=6000;
pub const START_SPEED_RANGE: RangeInclusive<i64> = 50..=1000;
pub const CUTOFF_SPEED_RANGE: RangeInclusive<i64> = 50..=2700;
pub const SPEED_CODE_RANGE: RangeInclusive<i64> = 0..=40;
pub const SLOPE_RANGE: RangeInclusive<i64> = 1..=20;
pub const MICROSTEP_RANGE: RangeInclusive<i64> = 0..=2;
pub const BACKLASH_RANGE: RangeInclusive<i64> = 0..=31;
/// Initialisation force: 0 full, 1 half, 2 one third.
pub const INIT_FORCE_RANGE: RangeInclusive<i64> = 0..=2;
pub const INIT_PORT_RANGE: RangeInclusive<i64> = 0..=8;

/// Direction in which the valve is driven during initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDirection {
    /// `Z`
    Clockwise,
    /// `Y`
    CounterClockwise,
}

/// Arguments of the `Z` / `Y` initialisation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    pub direction: InitDirection,
    pub force: i64,
    pub input_port: i64,
    pub output_port: i64,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            direction: InitDirection::Clockwise,
            force: 1,
            input_port: 1,
            output_port: 1,
        }
    }
}

/// Report queries (`?n`, `*`, `<`) and how their data decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Report {
    /// `?` commanded absolute plunger position.
    AbsolutePosition,
    /// `?1`
    StartSpeed,
    /// `?2`
    TopSpeed,
    /// `?3`
    CutoffSpeed,
    /// `?4` actual plunger position, raw increments.
    PlungerPosition,
    /// `?6`
    ValvePosition,
    /// `?10` 0 empty, 1 commands buffered.
    CommandBufferStatus,
    /// `?12`
    BacklashIncrements,
    /// `?13`
    AuxInput1,
    /// `?14`
    AuxInput2,
    /// `?15`
    Initializations,
    /// `?16`
    PlungerMovements,
    /// `?17`
    ValveMovements,
    /// `?18`
    ValveMovementsSinceReport,
    /// `?20`
    FirmwareChecksum,
    /// `?23`
    FirmwareVersion,
    /// `?24`
    ZeroGapIncrements,
    /// `?25`
    SlopeCode,
    /// `?28`
    CurrentMode,
    /// `?29` device status text.
    DeviceStatus,
    /// `?76`
    Configuration,
    /// `*` supply voltage in volts.
    Voltage,
    /// `<` user data.
    UserData,
}

impl Report {
    pub const ALL: [Report; 23] = [
        Report::AbsolutePosition,
        Report::StartSpeed,
        Report::TopSpeed,
        Report::CutoffSpeed,
        Report::PlungerPosition,
        Report::ValvePosition,
        Report::CommandBufferStatus,
        Report::BacklashIncrements,
        Report::AuxInput1,
        Report::AuxInput2,
        Report::Initializations,
        Report::PlungerMovements,
        Report::ValveMovements,
        Report::ValveMovementsSinceReport,
        Report::FirmwareChecksum,
        Report::FirmwareVersion,
        Report::ZeroGapIncrements,
        Report::SlopeCode,
        Report::CurrentMode,
        Report::DeviceStatus,
        Report::Configuration,
        Report::Voltage,
        Report::UserData,
    ];

    pub fn verb(self) -> &'static str {
        match self {
            Report::AbsolutePosition => "?",
            Report::StartSpeed => "?1",
            Report::TopSpeed => "?2",
            Report::CutoffSpeed => "?3",
            Report::PlungerPosition => "?4",
            Report::ValvePosition => "?6",
            Report::CommandBufferStatus => "?10",
            Report::BacklashIncrements => "?12",
            Report::AuxInput1 => "?13",
            Report::AuxInput2 => "?14",
            Report::Initializations => "?15",
            Report::PlungerMovements => "?16",
            Report::ValveMovements => "?17",
            Report::ValveMovementsSinceReport => "?18",
            Report::FirmwareChecksum => "?20",
            Report::FirmwareVersion => "?23",
            Report::ZeroGapIncrements => "?24",
            Report::SlopeCode => "?25",
            Report::CurrentMode => "?28",
            Report::DeviceStatus => "?29",
            Report::Configuration => "?76",
            Report::Voltage => "*",
            Report::UserData => "<",
        }
    }

    pub fn decode(self) -> Decode {
        match self {
            Report::AbsolutePosition => Decode::Number { field: "absolute position" },
            Report::StartSpeed => Decode::Number { field: "start speed" },
            Report::TopSpeed => Decode::Number { field: "top speed" },
            Report::CutoffSpeed => Decode::Number { field: "cutoff speed" },
            Report::PlungerPosition => Decode::Number { field: "plunger position" },
            Report::ValvePosition => Decode::Valve,
            Report::CommandBufferStatus => Decode::Number { field: "command buffer status" },
            Report::BacklashIncrements => Decode::Number { field: "backlash increments" },
            Report::AuxInput1 => Decode::Number { field: "auxiliary input 1" },
            Report::AuxInput2 => Decode::Number { field: "auxiliary input 2" },
            Report::Initializations => Decode::Number { field: "initializations" },
            Report::PlungerMovements => Decode::Number { field: "plunger movements" },
            Report::ValveMovements => Decode::Number { field: "valve movements" },
            Report::ValveMovementsSinceReport => Decode::Number {
                field: "valve movements since last report",
            },
            Report::FirmwareChecksum => Decode::Text { field: "firmware checksum" },
            Report::FirmwareVersion => Decode::Text { field: "firmware version" },
            Report::ZeroGapIncrements => Decode::Number { field: "zero gap increments" },
            Report::SlopeCode => Decode::Number { field: "slope code" },
            Report::CurrentMode => Decode::Number { field: "current mode" },
            Report::DeviceStatus => Decode::Text { field: "device status" },
            Report::Configuration => Decode::Text { field: "pump configuration" },
            Report::Voltage => Decode::Scaled {
                field: "voltage",
                divisor: 10.0,
            },
            Report::UserData => Decode::Text { field: "user data" },
        }
    }

    pub fn command(self) -> Command {
        Command::new(self.verb()).decode(self.decode())
    }
}

/// Command table for the action commands.
pub mod commands {
    use super::*;

    pub fn initialize(options: InitOptions) -> Command {
        let verb = match options.direction {
            InitDirection::Clockwise => "Z",
            InitDirection::CounterClockwise => "Y",
        };
        Command::new(verb)
            .int_arg("initialization force", options.force, INIT_FORCE_RANGE)
            .int_arg("input port", options.input_port, INIT_PORT_RANGE)
            .int_arg("output port", options.output_port, INIT_PORT_RANGE)
    }

    /// Marks the plunger initialised without moving it.
    pub fn simulated_initialize() -> Command {
        Command::new("z")
    }

    pub fn move_absolute(position: i64) -> Command {
        Command::new("A").int_arg("plunger position", position, POSITION_RANGE)
    }

    /// Relative aspirate.
    pub fn pickup(increments: i64) -> Command {
        Command::new("P").int_arg("pickup increments", increments, POSITION_RANGE)
    }

    /// Relative dispense.
    pub fn dispense(increments: i64) -> Command {
        Command::new("D").int_arg("dispense increments", increments, POSITION_RANGE)
    }

    pub fn top_speed(speed: i64) -> Command {
        Command::new("V").int_arg("top speed", speed, TOP_SPEED_RANGE)
    }

    pub fn start_speed(speed: i64) -> Command {
        Command::new("v").int_arg("start speed", speed, START_SPEED_RANGE)
    }

    pub fn cutoff_speed(speed: i64) -> Command {
        Command::new("c").int_arg("cutoff speed", speed, CUTOFF_SPEED_RANGE)
    }

    pub fn speed_code(code: i64) -> Command {
        Command::new("S").int_arg("speed code", code, SPEED_CODE_RANGE)
    }

    pub fn slope(code: i64) -> Command {
        Command::new("L").int_arg("slope", code, SLOPE_RANGE)
    }

    pub fn microstep_mode(mode: i64) -> Command {
        Command::new("N").int_arg("microstep mode", mode, MICROSTEP_RANGE)
    }

    pub fn backlash(increments: i64) -> Command {
        Command::new("K").int_arg("backlash increments", increments, BACKLASH_RANGE)
    }

    pub fn valve(position: ValvePosition) -> Command {
        Command::new(position.verb())
    }

    pub fn terminate() -> Command {
        Command::new("T")
    }
}

/// XLP6000 on an open session.
#[derive(Debug)]
pub struct SyringePump {
    session: InstrumentSession,
    address: char,
}

impl SyringePump {
    /// Wraps `transport` in an XLP6000 session for the pump at `address`.
    pub fn open(
        id: impl Into<String>,
        address: char,
        transport: impl Transport + 'static,
        read_timeout: Duration,
    ) -> Result<Self, LabError> {
        if !xlp6000::is_valid_address(address) {
            return Err(LabError::Configuration(format!(
                "pump address '{}' is not 1-9 or A-F",
                address
            )));
        }
        let session = InstrumentSession::new(id, Dialect::xlp6000(address), transport, read_timeout);
        info!(instrument = %session.id(), %address, "syringe pump ready");
        Ok(Self { session, address })
    }

    #[cfg(feature = "instrument_serial")]
    pub fn connect(
        id: impl Into<String>,
        address: char,
        params: &ConnectionParams,
    ) -> Result<Self, LabError> {
        let transport = open_serial(params)?;
        Self::open(id, address, transport, params.read_timeout)
    }

    /// Opens a configured pump on an already opened transport, using the
    /// entry's id, address and read timeout.
    pub fn open_configured(
        definition: &InstrumentDefinition,
        transport: impl Transport + 'static,
    ) -> Result<Self, LabError> {
        definition.require(InstrumentKind::SyringePump)?;
        Self::open(
            definition.id.as_str(),
            definition.pump_address,
            transport,
            definition.read_timeout,
        )
    }

    /// Opens the serial port named by a configuration entry.
    #[cfg(feature = "instrument_serial")]
    pub fn from_config(definition: &InstrumentDefinition) -> Result<Self, LabError> {
        definition.require(InstrumentKind::SyringePump)?;
        let transport = open_serial(&definition.connection_params()?)?;
        Self::open_configured(definition, transport)
    }

    pub fn address(&self) -> char {
        self.address
    }

    pub fn session(&self) -> &InstrumentSession {
        &self.session
    }

    async fn run(&self, command: Command) -> Result<Outcome, LabError> {
        self.session.transact(&command).await
    }

    pub async fn initialize(&self, options: InitOptions) -> Result<(), LabError> {
        self.run(commands::initialize(options)).await?.into_unit()
    }

    pub async fn simulated_initialize(&self) -> Result<(), LabError> {
        self.run(commands::simulated_initialize()).await?.into_unit()
    }

    pub async fn move_absolute(&self, position: i64) -> Result<(), LabError> {
        self.run(commands::move_absolute(position)).await?.into_unit()
    }

    /// Negative increments pick up, positive increments dispense.
    pub async fn move_relative(&self, increments: i64) -> Result<(), LabError> {
        let command = if increments < 0 {
            commands::pickup(increments.saturating_abs())
        } else {
            commands::dispense(increments)
        };
        self.run(command).await?.into_unit()
    }

    pub async fn set_top_speed(&self, speed: i64) -> Result<(), LabError> {
        self.run(commands::top_speed(speed)).await?.into_unit()
    }

    pub async fn set_start_speed(&self, speed: i64) -> Result<(), LabError> {
        self.run(commands::start_speed(speed)).await?.into_unit()
    }

    pub async fn set_cutoff_speed(&self, speed: i64) -> Result<(), LabError> {
        self.run(commands::cutoff_speed(speed)).await?.into_unit()
    }

    pub async fn set_speed_code(&self, code: i64) -> Result<(), LabError> {
        self.run(commands::speed_code(code)).await?.into_unit()
    }

    pub async fn set_slope(&self, code: i64) -> Result<(), LabError> {
        self.run(commands::slope(code)).await?.into_unit()
    }

    pub async fn set_microstep_mode(&self, mode: i64) -> Result<(), LabError> {
        self.run(commands::microstep_mode(mode)).await?.into_unit()
    }

    pub async fn set_backlash(&self, increments: i64) -> Result<(), LabError> {
        self.run(commands::backlash(increments)).await?.into_unit()
    }

    pub async fn set_valve(&self, position: ValvePosition) -> Result<(), LabError> {
        self.run(commands::valve(position)).await?.into_unit()
    }

    pub async fn valve(&self) -> Result<ValvePosition, LabError> {
        self.report(Report::ValvePosition).await?.valve()
    }

    /// Raw plunger increments reported by `?4`.
    pub async fn plunger_position(&self) -> Result<i64, LabError> {
        self.report(Report::PlungerPosition).await?.integer()
    }

    pub async fn top_speed(&self) -> Result<i64, LabError> {
        self.report(Report::TopSpeed).await?.integer()
    }

    pub async fn start_speed(&self) -> Result<i64, LabError> {
        self.report(Report::StartSpeed).await?.integer()
    }

    pub async fn cutoff_speed(&self) -> Result<i64, LabError> {
        self.report(Report::CutoffSpeed).await?.integer()
    }

    /// Supply voltage in volts.
    pub async fn voltage(&self) -> Result<f64, LabError> {
        self.report(Report::Voltage).await?.real()
    }

    /// Device status text reported by `?29`.
    pub async fn device_status(&self) -> Result<String, LabError> {
        self.report(Report::DeviceStatus).await?.text()
    }

    pub async fn firmware_version(&self) -> Result<String, LabError> {
        self.report(Report::FirmwareVersion).await?.text()
    }

    /// Aborts the command in progress.
    pub async fn terminate(&self) -> Result<(), LabError> {
        self.run(commands::terminate()).await?.into_unit()
    }

    /// Runs any report query and returns the full outcome.
    pub async fn report(&self, report: Report) -> Result<Outcome, LabError> {
        self.run(report.command()).await
    }

    /// Status byte, read through the command buffer report. Faults are
    /// returned in the status rather than as an error, for polling.
    pub async fn status(&self) -> Result<PumpStatus, LabError> {
        let outcome = self.report(Report::CommandBufferStatus).await?;
        outcome
            .status
            .map(PumpStatus)
            .ok_or_else(|| LabError::Protocol("pump response has no status byte".into()))
    }

    pub async fn close(self) {
        self.session.close().await;
    }
}
