//! Tecan XLP6000 syringe pump dialect (Cavro OEM protocol, DT framing).
//!
//! Commands are `/<addr><verb><args>R\r`. The trailing `R` is the execute
//! trigger; without it the pump only buffers the command.
//!
//! Every answer is a single line:
//!
//! ```text
//! [0xFF]* '/' '0' <status> <data...> 0x03 '\r' '\n'
//! ```
//!
//! The status byte carries the ready flag (bit 5) and an error code in the low
//! nibble, so faults are classified from the response itself.

use super::{Classifier, Command, Frame, Framer};
use crate::error::{DeviceError, LabError};
use crate::session::Link;
use async_trait::async_trait;
use tracing::warn;

/// Execute trigger and terminator appended to every command.
pub const TERMINATOR: &str = "R\r";

/// End of text, closes the data field.
pub const ETX: u8 = 0x03;

/// Line preamble some pumps send after power-up.
const PREAMBLE: u8 = 0xFF;

/// Status byte bit set while the pump is idle.
pub const READY_BIT: u8 = 0x20;

/// Valid pump addresses on a single-pump link.
pub fn is_valid_address(address: char) -> bool {
    matches!(address, '1'..='9' | 'A'..='F')
}

/// Message for an XLP6000 error code (low nibble of the status byte).
pub fn error_message(code: u8) -> String {
    let known = match code {
        1 => "Initialization error",
        2 => "Invalid command",
        3 => "Invalid operand",
        4 => "Invalid command sequence",
        6 => "EEPROM failure",
        7 => "Device not initialized",
        9 => "Plunger overload",
        10 => "Valve overload",
        11 => "Plunger move not allowed",
        15 => "Command overflow",
        _ => return format!("Unknown error code: {}", code),
    };
    known.to_string()
}

/// Decoded status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStatus(pub u8);

impl PumpStatus {
    pub fn is_ready(self) -> bool {
        self.0 & READY_BIT != 0
    }

    pub fn error_code(self) -> u8 {
        self.0 & 0x0F
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Xlp6000Framer {
    address: char,
}

impl Xlp6000Framer {
    pub fn new(address: char) -> Self {
        Self { address }
    }

    pub fn address(&self) -> char {
        self.address
    }
}

impl Framer for Xlp6000Framer {
    fn encode(&self, command: &Command) -> Vec<u8> {
        let args = command
            .args()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("/{}{}{}{}", self.address, command.verb(), args, TERMINATOR).into_bytes()
    }

    fn frame(&self, command: &Command, lines: Vec<Vec<u8>>) -> Result<Frame, LabError> {
        let [line]: [Vec<u8>; 1] = lines.try_into().map_err(|lines: Vec<Vec<u8>>| {
            LabError::Protocol(format!(
                "'{}' expects 1 response line, got {}",
                command.verb(),
                lines.len()
            ))
        })?;

        let start = line
            .iter()
            .position(|&b| b != PREAMBLE)
            .unwrap_or(line.len());
        let body = &line[start..];

        if !body.starts_with(b"/0") || body.len() < 3 {
            return Err(LabError::Protocol(format!(
                "'{}' response lacks the /0 header: {:?}",
                command.verb(),
                String::from_utf8_lossy(&line)
            )));
        }
        let status = body[2];
        let rest = &body[3..];
        let etx = rest.iter().position(|&b| b == ETX).ok_or_else(|| {
            LabError::Protocol(format!(
                "'{}' response is not terminated by ETX: {:?}",
                command.verb(),
                String::from_utf8_lossy(&line)
            ))
        })?;

        Ok(Frame {
            echo: None,
            payload: Some(String::from_utf8_lossy(&rest[..etx]).into_owned()),
            status: Some(status),
        })
    }
}

/// Reads the error nibble of the embedded status byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedStatusClassifier;

#[async_trait]
impl Classifier for EmbeddedStatusClassifier {
    async fn classify(
        &self,
        frame: &Frame,
        _link: &mut Link<'_>,
    ) -> Result<Option<DeviceError>, LabError> {
        let status = frame
            .status
            .map(PumpStatus)
            .ok_or_else(|| LabError::Protocol("pump response has no status byte".into()))?;
        match status.error_code() {
            0 => Ok(None),
            code => {
                let fault = DeviceError::new(code, error_message(code));
                warn!(code, status = status.0, message = %fault.message, "pump reported a fault");
                Ok(Some(fault))
            }
        }
    }
}
