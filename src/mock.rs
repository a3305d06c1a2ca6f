//! Simulated instruments and transports.
//!
//! Everything here runs without hardware and is used by the crate's own tests.
//!
//! # Available Mocks
//!
//! - `ScriptedTransport` - in-memory [`Transport`] driven by a [`Responder`],
//!   recording every write and read with a tokio timestamp
//! - `serve` - runs a [`Responder`] as a device task on one end of a
//!   `tokio::io::duplex` pipe
//! - `SimulatedCornerstone` - Cornerstone 130 command interpreter with
//!   latched errors and `STB?` / `ERROR?`
//! - `SimulatedXlp6000` - XLP6000 interpreter answering with framed status
//! - `SimulatedSpectrometer` - [`SpectrometerDriver`] producing a synthetic
//!   emission line

use crate::error::LabError;
use crate::instrument::spectrometer::SpectrometerDriver;
use crate::protocol::{ShutterState, ValvePosition};
use crate::transport::Transport;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::trace;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turns one command line into the response lines a device would send back,
/// without line terminators. An empty result means the device stays silent.
pub trait Responder: Send + 'static {
    fn respond(&mut self, line: &[u8]) -> Vec<Vec<u8>>;
}

impl<F> Responder for F
where
    F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
{
    fn respond(&mut self, line: &[u8]) -> Vec<Vec<u8>> {
        self(line)
    }
}

// =============================================================================
// ScriptedTransport - recording in-memory transport
// =============================================================================

/// One wire event seen by a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Write(String),
    Read(String),
}

/// Shared, timestamped record of wire traffic.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    events: Arc<Mutex<Vec<(Instant, WireEvent)>>>,
}

impl WireLog {
    fn push(&self, event: WireEvent) {
        lock(&self.events).push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<(Instant, WireEvent)> {
        lock(&self.events).clone()
    }

    /// Written lines in order, terminators included.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|(_, event)| match event {
                WireEvent::Write(line) => Some(line.clone()),
                WireEvent::Read(_) => None,
            })
            .collect()
    }

    /// Time of the first write whose text starts with `prefix`.
    pub fn first_write(&self, prefix: &str) -> Option<Instant> {
        lock(&self.events).iter().find_map(|(at, event)| match event {
            WireEvent::Write(line) if line.starts_with(prefix) => Some(*at),
            _ => None,
        })
    }
}

/// In-memory [`Transport`]. Responses are queued at write time and handed
/// out one per `read_line`; reading an empty queue waits the full timeout.
pub struct ScriptedTransport {
    port: String,
    responder: Box<dyn Responder>,
    pending: VecDeque<Vec<u8>>,
    log: WireLog,
}

impl ScriptedTransport {
    pub fn new(port: impl Into<String>, responder: impl Responder) -> Self {
        Self {
            port: port.into(),
            responder: Box::new(responder),
            pending: VecDeque::new(),
            log: WireLog::default(),
        }
    }

    /// Handle to the wire log; stays valid after the transport moves into a session.
    pub fn log(&self) -> WireLog {
        self.log.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write_line(&mut self, line: &[u8]) -> Result<(), LabError> {
        self.log
            .push(WireEvent::Write(String::from_utf8_lossy(line).into_owned()));
        let replies = self.responder.respond(line);
        self.pending.extend(replies);
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, LabError> {
        match self.pending.pop_front() {
            Some(line) => {
                self.log
                    .push(WireEvent::Read(String::from_utf8_lossy(&line).into_owned()));
                Ok(line)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Err(LabError::TransportTimeout {
                    port: self.port.clone(),
                    timeout,
                })
            }
        }
    }

    fn port(&self) -> &str {
        &self.port
    }
}

/// Runs `responder` as a device on `stream`. Incoming lines end at
/// `terminator`; every reply is sent with `\r\n`. The task ends when the host
/// side of the pipe is dropped.
pub fn serve<S>(stream: S, terminator: u8, mut responder: impl Responder) -> tokio::task::JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match stream.read_until(terminator, &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            trace!(line = %String::from_utf8_lossy(&line), "simulated device received");
            for mut reply in responder.respond(&line) {
                reply.extend_from_slice(b"\r\n");
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
            if stream.flush().await.is_err() {
                return;
            }
        }
    })
}

// =============================================================================
// SimulatedCornerstone - Cornerstone 130 monochromator
// =============================================================================

#[derive(Debug)]
struct CornerstoneState {
    wavelength: f64,
    step: i64,
    grating: i64,
    shutter: ShutterState,
    filter: i64,
    latched_error: Option<u8>,
    inject: Option<u8>,
}

/// Cornerstone 130 interpreter. Clones share state, so a test can keep one
/// handle while the other answers on a transport.
#[derive(Debug, Clone)]
pub struct SimulatedCornerstone {
    state: Arc<Mutex<CornerstoneState>>,
}

impl Default for SimulatedCornerstone {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCornerstone {
    /// Parked at 500 nm, grating 1, shutter closed, filter 1.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CornerstoneState {
                wavelength: 500.0,
                step: 0,
                grating: 1,
                shutter: ShutterState::Closed,
                filter: 1,
                latched_error: None,
                inject: None,
            })),
        }
    }

    /// Latches `code` after the next command that is not a status query.
    pub fn fail_next(&self, code: u8) {
        lock(&self.state).inject = Some(code);
    }

    pub fn wavelength(&self) -> f64 {
        lock(&self.state).wavelength
    }

    pub fn grating(&self) -> i64 {
        lock(&self.state).grating
    }

    pub fn shutter(&self) -> ShutterState {
        lock(&self.state).shutter
    }

    fn interpret(state: &mut CornerstoneState, verb: &str, arg: Option<&str>) -> Result<Option<String>, u8> {
        let int_arg = |range: std::ops::RangeInclusive<i64>| -> Result<i64, u8> {
            let value: i64 = arg.and_then(|a| a.parse().ok()).ok_or(2u8)?;
            if range.contains(&value) {
                Ok(value)
            } else {
                Err(2)
            }
        };
        match verb {
            "HANDSHAKE" => int_arg(0..=1).map(|_| None),
            "WAVE?" => Ok(Some(format!("{:.3}", state.wavelength))),
            "GOWAVE" => {
                let target: f64 = arg.and_then(|a| a.parse().ok()).ok_or(2u8)?;
                if !(0.0..=1600.0).contains(&target) {
                    return Err(3);
                }
                state.wavelength = target;
                Ok(None)
            }
            "STEP?" => Ok(Some(state.step.to_string())),
            "STEP" => {
                state.step = int_arg(-9999..=9999)?;
                Ok(None)
            }
            "GRAT?" => Ok(Some(format!("{},1200,  500", state.grating))),
            "GRAT" => {
                let grating = int_arg(1..=2)?;
                if grating == state.grating {
                    return Err(7);
                }
                state.grating = grating;
                Ok(None)
            }
            "SHUTTER?" => Ok(Some(state.shutter.token().to_string())),
            "SHUTTER" => {
                state.shutter = match arg {
                    Some("O") => ShutterState::Open,
                    Some("C") => ShutterState::Closed,
                    _ => return Err(2),
                };
                Ok(None)
            }
            "FILTER?" => Ok(Some(state.filter.to_string())),
            "FILTER" => {
                state.filter = int_arg(1..=6)?;
                Ok(None)
            }
            "INFO?" => Ok(Some("Cornerstone 130, Simulated, v1.00".to_string())),
            "ABORT" => Ok(None),
            _ => Err(1),
        }
    }
}

impl Responder for SimulatedCornerstone {
    fn respond(&mut self, line: &[u8]) -> Vec<Vec<u8>> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        let mut parts = text.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let arg = parts.next();

        let mut state = lock(&self.state);
        let mut replies = vec![text.as_bytes().to_vec()];
        match verb {
            "STB?" => {
                let stb = if state.latched_error.is_some() { "1" } else { "0" };
                replies.push(stb.as_bytes().to_vec());
            }
            "ERROR?" => {
                let code = state.latched_error.take().unwrap_or(0);
                replies.push(code.to_string().into_bytes());
            }
            _ => {
                match Self::interpret(&mut state, verb, arg) {
                    Ok(Some(payload)) => replies.push(payload.into_bytes()),
                    Ok(None) => {}
                    Err(code) => state.latched_error = Some(code),
                }
                if let Some(code) = state.inject.take() {
                    state.latched_error = Some(code);
                }
            }
        }
        replies
    }
}

// =============================================================================
// SimulatedXlp6000 - Tecan XLP6000 syringe pump
// =============================================================================

#[derive(Debug)]
struct PumpState {
    initialized: bool,
    plunger: i64,
    valve: ValvePosition,
    top_speed: i64,
    start_speed: i64,
    cutoff_speed: i64,
    slope: i64,
    backlash: i64,
    microstep: i64,
    voltage_tenths: i64,
    user_data: String,
    inject: Option<u8>,
}

/// XLP6000 interpreter. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedXlp6000 {
    address: char,
    state: Arc<Mutex<PumpState>>,
}

impl SimulatedXlp6000 {
    /// Uninitialised pump at `address`, plunger at 0, valve at input.
    pub fn new(address: char) -> Self {
        Self {
            address,
            state: Arc::new(Mutex::new(PumpState {
                initialized: false,
                plunger: 0,
                valve: ValvePosition::Input,
                top_speed: 1400,
                start_speed: 900,
                cutoff_speed: 900,
                slope: 14,
                backlash: 12,
                microstep: 0,
                voltage_tenths: 240,
                user_data: String::new(),
                inject: None,
            })),
        }
    }

    /// Reports `code` in the status byte of the next response.
    pub fn fail_next(&self, code: u8) {
        lock(&self.state).inject = Some(code);
    }

    pub fn plunger(&self) -> i64 {
        lock(&self.state).plunger
    }

    pub fn valve(&self) -> ValvePosition {
        lock(&self.state).valve
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    fn frame(code: u8, data: &str) -> Vec<u8> {
        let mut line = vec![0xFF, b'/', b'0', 0x60 | (code & 0x0F)];
        line.extend_from_slice(data.as_bytes());
        line.push(0x03);
        line
    }

    fn report(state: &PumpState, number: &str) -> Result<String, u8> {
        let value = match number {
            "" => state.plunger.to_string(),
            "1" => state.start_speed.to_string(),
            "2" => state.top_speed.to_string(),
            "3" => state.cutoff_speed.to_string(),
            "4" => state.plunger.to_string(),
            "6" => match state.valve {
                ValvePosition::Input => "i",
                ValvePosition::Output => "o",
                ValvePosition::Bypass => "b",
            }
            .to_string(),
            "10" => "0".to_string(),
            "12" => state.backlash.to_string(),
            "13" | "14" => "0".to_string(),
            "15" | "16" | "17" | "18" => "0".to_string(),
            "20" => "5A3C".to_string(),
            "23" => "XLP6000 v1.2 (simulated)".to_string(),
            "24" => "0".to_string(),
            "25" => state.slope.to_string(),
            "28" => state.microstep.to_string(),
            "29" => "ready".to_string(),
            "76" => "6000ul, 3-port".to_string(),
            _ => return Err(3),
        };
        Ok(value)
    }

    fn interpret(state: &mut PumpState, body: &str) -> Result<String, u8> {
        if let Some(number) = body.strip_prefix('?') {
            return Self::report(state, number);
        }
        if body == "*" {
            return Ok(state.voltage_tenths.to_string());
        }
        if body == "<" {
            return Ok(state.user_data.clone());
        }

        let mut chars = body.chars();
        let verb = chars.next().ok_or(2u8)?;
        let args: Vec<i64> = chars
            .as_str()
            .split(',')
            .filter(|a| !a.is_empty())
            .map(|a| a.parse().map_err(|_| 3u8))
            .collect::<Result<_, _>>()?;
        let arg = |range: std::ops::RangeInclusive<i64>| -> Result<i64, u8> {
            match args.first() {
                Some(v) if range.contains(v) => Ok(*v),
                _ => Err(3),
            }
        };

        let needs_init = matches!(verb, 'A' | 'P' | 'D' | 'I' | 'O' | 'B');
        if needs_init && !state.initialized {
            return Err(7);
        }

        match verb {
            'Z' | 'Y' | 'z' => {
                state.initialized = true;
                state.plunger = 0;
            }
            'A' => state.plunger = arg(0..=48000)?,
            'P' => {
                let target = state.plunger + arg(0..=48000)?;
                if target > 48000 {
                    return Err(3);
                }
                state.plunger = target;
            }
            'D' => {
                let target = state.plunger - arg(0..=48000)?;
                if target < 0 {
                    return Err(3);
                }
                state.plunger = target;
            }
            'V' => state.top_speed = arg(5..=6000)?,
            'v' => state.start_speed = arg(50..=1000)?,
            'c' => state.cutoff_speed = arg(50..=2700)?,
            'S' => {
                arg(0..=40)?;
            }
            'L' => state.slope = arg(1..=20)?,
            'N' => state.microstep = arg(0..=2)?,
            'K' => state.backlash = arg(0..=31)?,
            'I' => state.valve = ValvePosition::Input,
            'O' => state.valve = ValvePosition::Output,
            'B' => state.valve = ValvePosition::Bypass,
            'T' => {}
            _ => return Err(2),
        }
        Ok(String::new())
    }
}

impl Responder for SimulatedXlp6000 {
    fn respond(&mut self, line: &[u8]) -> Vec<Vec<u8>> {
        let text = String::from_utf8_lossy(line);
        let Some(rest) = text.strip_prefix('/') else {
            return Vec::new();
        };
        let mut chars = rest.chars();
        if chars.next() != Some(self.address) {
            // Addressed to another pump on the bus.
            return Vec::new();
        }
        let body = chars.as_str().trim_end_matches(['\r', '\n']);
        let Some(body) = body.strip_suffix('R') else {
            // Buffered until R arrives.
            return Vec::new();
        };

        let mut state = lock(&self.state);
        let reply = match Self::interpret(&mut state, body) {
            Ok(data) => Self::frame(state.inject.take().unwrap_or(0), &data),
            Err(code) => Self::frame(code, ""),
        };
        vec![reply]
    }
}

// =============================================================================
// SimulatedSpectrometer - HR4000-style driver
// =============================================================================

/// HR4000 detector size.
pub const HR4000_PIXELS: usize = 3648;
/// 14-bit ADC full scale.
pub const FULL_SCALE: f64 = 16383.0;

/// Synthetic spectrometer: a flat baseline plus one Gaussian line whose
/// height grows with integration time until it clips at full scale.
#[derive(Debug)]
pub struct SimulatedSpectrometer {
    serial_number: String,
    integration_time: u32,
    scans_to_average: u32,
    dark_correction: bool,
    nonlinearity_correction: bool,
    saturated: bool,
    valid: bool,
    open: bool,
}

impl SimulatedSpectrometer {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            integration_time: 100_000,
            scans_to_average: 1,
            dark_correction: false,
            nonlinearity_correction: false,
            saturated: false,
            valid: false,
            open: true,
        }
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if !self.open {
            bail!("spectrometer {} is closed", self.serial_number);
        }
        Ok(())
    }
}

impl SpectrometerDriver for SimulatedSpectrometer {
    fn serial_number(&self) -> anyhow::Result<String> {
        self.ensure_open()?;
        Ok(self.serial_number.clone())
    }

    fn device_index(&self) -> anyhow::Result<usize> {
        self.ensure_open()?;
        Ok(0)
    }

    fn pixel_count(&self) -> anyhow::Result<usize> {
        self.ensure_open()?;
        Ok(HR4000_PIXELS)
    }

    fn integration_time(&self) -> anyhow::Result<u32> {
        self.ensure_open()?;
        Ok(self.integration_time)
    }

    fn set_integration_time(&mut self, micros: u32) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.integration_time = micros;
        Ok(())
    }

    fn min_integration_time(&self) -> anyhow::Result<u32> {
        Ok(10)
    }

    fn max_integration_time(&self) -> anyhow::Result<u32> {
        Ok(65_535_000)
    }

    fn scans_to_average(&self) -> anyhow::Result<u32> {
        self.ensure_open()?;
        Ok(self.scans_to_average)
    }

    fn set_scans_to_average(&mut self, scans: u32) -> anyhow::Result<()> {
        self.ensure_open()?;
        if scans == 0 {
            return Err(anyhow!("scans to average must be at least 1"));
        }
        self.scans_to_average = scans;
        Ok(())
    }

    fn electrical_dark_correction(&self) -> anyhow::Result<bool> {
        Ok(self.dark_correction)
    }

    fn set_electrical_dark_correction(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.dark_correction = enabled;
        Ok(())
    }

    fn nonlinearity_correction(&self) -> anyhow::Result<bool> {
        Ok(self.nonlinearity_correction)
    }

    fn set_nonlinearity_correction(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.nonlinearity_correction = enabled;
        Ok(())
    }

    fn stray_light_correction(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn calibration_coefficients(&self) -> anyhow::Result<[f64; 4]> {
        Ok([194.85, 0.2695, -1.4e-5, -1.2e-10])
    }

    fn spectrum(&mut self) -> anyhow::Result<Vec<f64>> {
        self.ensure_open()?;
        let baseline = if self.dark_correction { 0.0 } else { 1500.0 };
        let peak = 4000.0 * f64::from(self.integration_time) / 100_000.0;
        let centre = HR4000_PIXELS as f64 / 2.0;
        let width = 12.0;

        let mut saturated = false;
        let intensities: Vec<f64> = (0..HR4000_PIXELS)
            .map(|pixel| {
                let x = (pixel as f64 - centre) / width;
                let counts = baseline + peak * (-0.5 * x * x).exp();
                if counts >= FULL_SCALE {
                    saturated = true;
                    FULL_SCALE
                } else {
                    counts
                }
            })
            .collect();
        self.saturated = saturated;
        self.valid = true;
        Ok(intensities)
    }

    fn is_saturated(&self) -> anyhow::Result<bool> {
        Ok(self.saturated)
    }

    fn is_spectrum_valid(&self) -> anyhow::Result<bool> {
        Ok(self.valid)
    }

    fn stop_averaging(&mut self) -> anyhow::Result<()> {
        self.ensure_open()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(replies: Vec<Vec<u8>>) -> Vec<String> {
        replies
            .into_iter()
            .map(|l| String::from_utf8_lossy(&l).into_owned())
            .collect()
    }

    #[test]
    fn cornerstone_echoes_and_latches_errors() {
        let mut mono = SimulatedCornerstone::new();
        assert_eq!(lines(mono.respond(b"WAVE?\n")), ["WAVE?", "500.000"]);
        assert_eq!(lines(mono.respond(b"STB?\n")), ["STB?", "0"]);

        assert_eq!(lines(mono.respond(b"BOGUS\n")), ["BOGUS"]);
        assert_eq!(lines(mono.respond(b"STB?\n")), ["STB?", "1"]);
        assert_eq!(lines(mono.respond(b"ERROR?\n")), ["ERROR?", "1"]);
        assert_eq!(lines(mono.respond(b"STB?\n")), ["STB?", "0"]);
    }

    #[test]
    fn cornerstone_injected_fault() {
        let mut mono = SimulatedCornerstone::new();
        mono.fail_next(3);
        assert_eq!(lines(mono.respond(b"WAVE?\n")), ["WAVE?", "500.000"]);
        assert_eq!(lines(mono.respond(b"STB?\n")), ["STB?", "1"]);
        assert_eq!(lines(mono.respond(b"ERROR?\n")), ["ERROR?", "3"]);
    }

    #[test]
    fn pump_requires_initialization() {
        let mut pump = SimulatedXlp6000::new('1');
        assert_eq!(pump.respond(b"/1A100R\r"), vec![b"\xFF/0\x67\x03".to_vec()]);
        assert_eq!(pump.respond(b"/1ZR\r"), vec![b"\xFF/0`\x03".to_vec()]);
        assert_eq!(pump.respond(b"/1A100R\r"), vec![b"\xFF/0`\x03".to_vec()]);
        assert_eq!(pump.respond(b"/1?4R\r"), vec![b"\xFF/0`100\x03".to_vec()]);
        assert_eq!(pump.plunger(), 100);
    }

    #[test]
    fn pump_ignores_other_addresses_and_unexecuted_commands() {
        let mut pump = SimulatedXlp6000::new('1');
        assert!(pump.respond(b"/2ZR\r").is_empty());
        assert!(pump.respond(b"/1Z\r").is_empty());
        assert!(!pump.is_initialized());
    }

    #[test]
    fn simulated_spectrum_saturates_with_long_integration() {
        let mut spec = SimulatedSpectrometer::new("HR4C0001");
        let short = spec.spectrum().unwrap();
        assert_eq!(short.len(), HR4000_PIXELS);
        assert!(!spec.is_saturated().unwrap());

        spec.set_integration_time(1_000_000).unwrap();
        spec.spectrum().unwrap();
        assert!(spec.is_saturated().unwrap());
    }
}
