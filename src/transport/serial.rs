//! Serial connection parameters and port opening.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use super::{LineTransport, PortClaim};
#[cfg(feature = "instrument_serial")]
use crate::error::LabError;
#[cfg(feature = "instrument_serial")]
use tracing::info;

/// Parity modes for serial communication
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Settings for one serial connection. Immutable once a session is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Path to the serial device (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Parity setting
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Hard bound on every single line read
    pub read_timeout: Duration,
}

impl ConnectionParams {
    /// 9600 8N1 with a 2 s read timeout, the settings all three instruments use.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Overrides the read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout: Duration::from_secs(2),
        }
    }
}

/// Opens `params.port` as a line transport.
///
/// The port name is claimed before the device is touched, so a second open of
/// the same port in this process is rejected with a configuration error.
#[cfg(feature = "instrument_serial")]
pub fn open_serial(
    params: &ConnectionParams,
) -> Result<LineTransport<tokio_serial::SerialStream>, LabError> {
    use tokio_serial::SerialPortBuilderExt;

    let claim = PortClaim::acquire(&params.port)?;

    let data_bits = match params.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        other => {
            return Err(LabError::Configuration(format!(
                "unsupported data bits {} for '{}'",
                other, params.port
            )))
        }
    };
    let stop_bits = match params.stop_bits {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        other => {
            return Err(LabError::Configuration(format!(
                "unsupported stop bits {} for '{}'",
                other, params.port
            )))
        }
    };
    let parity = match params.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    };

    let stream = tokio_serial::new(&params.port, params.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(params.read_timeout)
        .open_native_async()
        .map_err(|e| LabError::Connection {
            port: params.port.clone(),
            reason: e.to_string(),
        })?;

    info!(
        port = %params.port,
        baud_rate = params.baud_rate,
        "serial port opened"
    );
    Ok(LineTransport::with_claim(params.port.clone(), stream, claim))
}
