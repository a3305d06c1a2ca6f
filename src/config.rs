//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (`config/rustlab.toml` by default)
//! 2. Environment variables prefixed with `RUSTLAB_`, nested with `__`
//!
//! ```text
//! RUSTLAB_APPLICATION__LOG_LEVEL=debug
//! RUSTLAB_APPLICATION__NAME="Beamline 3"
//! ```
//!
//! # Example file
//!
//! ```toml
//! [application]
//! name = "optics bench"
//! log_level = "info"
//!
//! [[instruments]]
//! id = "mono"
//! kind = "monochromator"
//! port = "/dev/ttyUSB0"
//! grating_settle = "12s"
//!
//! [[instruments]]
//! id = "pump"
//! kind = "syringe_pump"
//! port = "/dev/ttyUSB1"
//! pump_address = "1"
//!
//! [[instruments]]
//! id = "spec"
//! kind = "spectrometer"
//! serial_number = "HR4C1234"
//! ```

use crate::error::LabError;
use crate::protocol::xlp6000;
use crate::transport::{ConnectionParams, Parity};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    pub application: ApplicationConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which driver an instrument entry selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Monochromator,
    SyringePump,
    Spectrometer,
}

impl InstrumentKind {
    /// Whether the instrument talks over a serial line.
    pub fn is_serial(self) -> bool {
        !matches!(self, InstrumentKind::Spectrometer)
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    pub kind: InstrumentKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Serial port (e.g. "/dev/ttyUSB0", "COM3"); required for serial kinds
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Bound on every line read
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,

    /// Monochromator turret settle window after a grating change
    #[serde(with = "humantime_serde", default = "default_grating_settle")]
    pub grating_settle: Duration,
    /// XLP6000 address switch setting
    #[serde(default = "default_pump_address")]
    pub pump_address: char,
    /// Spectrometer to open when several are attached
    #[serde(default)]
    pub serial_number: Option<String>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_grating_settle() -> Duration {
    crate::instrument::monochromator::DEFAULT_GRATING_SETTLE
}

fn default_pump_address() -> char {
    crate::instrument::pump::DEFAULT_ADDRESS
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl LabConfig {
    /// Load configuration from `config/rustlab.toml` and the environment.
    pub fn load() -> Result<Self, LabError> {
        Self::load_from("config/rustlab.toml")
    }

    /// Load configuration from a specific file path, then apply
    /// `RUSTLAB_` environment overrides and validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, LabError> {
        Self::extract(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("RUSTLAB_").split("__")),
        )
    }

    /// Parse and validate an in-memory TOML document. No environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, LabError> {
        Self::extract(Figment::from(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, LabError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument IDs are unique
    /// - Serial instruments name a port, and no port is used twice
    /// - Data bits are 5-8 and stop bits 1 or 2
    /// - Pump addresses are 1-9 or A-F
    pub fn validate(&self) -> Result<(), LabError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(instrument.id.as_str()) {
                return Err(LabError::Configuration(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            instrument.validate()?;

            if let Some(port) = &instrument.port {
                if !ports.insert(port.as_str()) {
                    return Err(LabError::Configuration(format!(
                        "Serial port '{}' is assigned to more than one instrument",
                        port
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn instrument(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments.iter().find(|i| i.id == id)
    }

    pub fn enabled_instruments(&self) -> impl Iterator<Item = &InstrumentDefinition> {
        self.instruments.iter().filter(|i| i.enabled)
    }
}

impl InstrumentDefinition {
    fn validate(&self) -> Result<(), LabError> {
        if self.kind.is_serial() && self.port.as_deref().map_or(true, str::is_empty) {
            return Err(LabError::Configuration(format!(
                "Instrument '{}' needs a serial port",
                self.id
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(LabError::Configuration(format!(
                "Invalid data_bits {} for instrument '{}'. Must be 5-8",
                self.data_bits, self.id
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(LabError::Configuration(format!(
                "Invalid stop_bits {} for instrument '{}'. Must be 1 or 2",
                self.stop_bits, self.id
            )));
        }
        if self.kind == InstrumentKind::SyringePump && !xlp6000::is_valid_address(self.pump_address) {
            return Err(LabError::Configuration(format!(
                "Invalid pump_address '{}' for instrument '{}'. Must be 1-9 or A-F",
                self.pump_address, self.id
            )));
        }
        Ok(())
    }

    /// Fails unless this entry is enabled and describes a `kind` instrument.
    pub fn require(&self, kind: InstrumentKind) -> Result<(), LabError> {
        if self.kind != kind {
            return Err(LabError::Configuration(format!(
                "Instrument '{}' is a {:?}, not a {:?}",
                self.id, self.kind, kind
            )));
        }
        if !self.enabled {
            return Err(LabError::Configuration(format!(
                "Instrument '{}' is disabled",
                self.id
            )));
        }
        Ok(())
    }

    /// Serial settings for this instrument.
    pub fn connection_params(&self) -> Result<ConnectionParams, LabError> {
        let port = self.port.clone().ok_or_else(|| {
            LabError::Configuration(format!("Instrument '{}' has no serial port", self.id))
        })?;
        Ok(ConnectionParams {
            port,
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            read_timeout: self.read_timeout,
        })
    }
}
