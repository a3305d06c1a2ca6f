//! Cornerstone 130 monochromator dialect.
//!
//! Commands are `VERB[ ARG]*\n`. With handshaking off (`HANDSHAKE 0`) the
//! device echoes every command on its own line; queries add one payload line.
//! Faults are not part of the response: after each command the host asks for
//! the status byte (`STB?`) and, if it is nonzero, for the error code
//! (`ERROR?`).

use super::{Classifier, Command, Decode, Frame, Framer};
use crate::error::{DeviceError, LabError};
use crate::session::Link;
use async_trait::async_trait;
use tracing::warn;

/// Line terminator for every command.
pub const TERMINATOR: char = '\n';

/// Status byte query.
pub fn status_query() -> Command {
    Command::new("STB?")
        .response_lines(2)
        .decode(Decode::Digit {
            field: "status byte",
        })
}

/// Error code query, issued only after a nonzero status byte.
pub fn error_query() -> Command {
    Command::new("ERROR?")
        .response_lines(2)
        .decode(Decode::Digit {
            field: "error code",
        })
}

/// Message for a Cornerstone error code.
///
/// Codes 4 and 5 are not defined by the device documentation and fall through
/// to the generic message like any other unmapped code.
pub fn error_message(code: u8) -> String {
    let known = match code {
        0 => "System error (miscellaneous).",
        1 => "Command not understood.",
        2 => "Bad parameter used in Command.",
        3 => "Destination position for wavelength motion not allowed.",
        6 => "Accessory not present (usually filter wheel).",
        7 => "Accessory already in specified position.",
        8 => "Could not home wavelength drive.",
        9 => "Label too long.",
        _ => return format!("Unknown error code: {}", code),
    };
    known.to_string()
}

/// Command line without its terminator, as the device echoes it back.
fn command_text(command: &Command) -> String {
    let mut line = String::from(command.verb());
    for arg in command.args() {
        line.push(' ');
        line.push_str(&arg.to_string());
    }
    line
}

/// Framer for the echoed two-line / one-line exchanges. An echo that does
/// not restate the command is a protocol error.
#[derive(Debug, Clone, Copy, Default)]
pub struct CornerstoneFramer;

impl Framer for CornerstoneFramer {
    fn encode(&self, command: &Command) -> Vec<u8> {
        let mut line = command_text(command);
        line.push(TERMINATOR);
        line.into_bytes()
    }

    fn frame(&self, command: &Command, lines: Vec<Vec<u8>>) -> Result<Frame, LabError> {
        if lines.len() != command.expected_lines() {
            return Err(LabError::Protocol(format!(
                "'{}' expects {} response line(s), got {}",
                command.verb(),
                command.expected_lines(),
                lines.len()
            )));
        }

        let mut lines = lines
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned());
        let echo = lines.next();
        if let Some(echo) = &echo {
            // A late reply to an earlier, timed-out command shows up here.
            let expected = command_text(command);
            if echo.trim() != expected {
                warn!(verb = command.verb(), echo = %echo, "echo does not restate command");
                return Err(LabError::Protocol(format!(
                    "expected echo {:?}, got {:?}",
                    expected, echo
                )));
            }
        }

        Ok(Frame {
            echo,
            payload: lines.next(),
            status: None,
        })
    }
}

/// Side-channel classifier: `STB?`, then `ERROR?` when the status is nonzero.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusByteClassifier;

async fn read_code(link: &mut Link<'_>, command: &Command) -> Result<u8, LabError> {
    let value = link
        .query(command)
        .await?
        .and_then(|v| v.as_integer())
        .ok_or_else(|| LabError::Protocol(format!("'{}' returned no value", command.verb())))?;
    u8::try_from(value).map_err(|_| LabError::decode(command.decoder().field(), value.to_string()))
}

#[async_trait]
impl Classifier for StatusByteClassifier {
    async fn classify(
        &self,
        _frame: &Frame,
        link: &mut Link<'_>,
    ) -> Result<Option<DeviceError>, LabError> {
        if read_code(link, &status_query()).await? == 0 {
            return Ok(None);
        }

        let code = read_code(link, &error_query()).await?;
        let fault = DeviceError::new(code, error_message(code));
        warn!(code, message = %fault.message, "monochromator reported a fault");
        Ok(Some(fault))
    }
}
