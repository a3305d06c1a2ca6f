//! Commands and their bounded arguments.

use super::decode::Decode;
use crate::error::LabError;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

/// One command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Integer that must lie in `range` before it may be encoded.
    Int {
        name: &'static str,
        value: i64,
        range: RangeInclusive<i64>,
    },
    /// Fixed token such as the shutter's `O` / `C`.
    Token(&'static str),
}

impl Arg {
    /// A bounded integer argument.
    pub fn int(name: &'static str, value: i64, range: RangeInclusive<i64>) -> Self {
        Arg::Int { name, value, range }
    }

    fn validate(&self) -> Result<(), LabError> {
        match self {
            Arg::Int { name, value, range } if !range.contains(value) => {
                Err(LabError::ArgumentOutOfRange {
                    name,
                    value: *value,
                    min: *range.start(),
                    max: *range.end(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int { value, .. } => write!(f, "{}", value),
            Arg::Token(token) => f.write_str(token),
        }
    }
}

/// A command together with everything the transaction needs to know about
/// its response: how many lines come back, how long the mechanics need before
/// the response means anything, and how the payload decodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    verb: &'static str,
    args: Vec<Arg>,
    response_lines: usize,
    settle: Duration,
    decode: Decode,
}

impl Command {
    /// A blind command: one response line, nothing to decode, no settle wait.
    pub fn new(verb: &'static str) -> Self {
        Self {
            verb,
            args: Vec::new(),
            response_lines: 1,
            settle: Duration::ZERO,
            decode: Decode::None,
        }
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Appends a bounded integer argument.
    pub fn int_arg(self, name: &'static str, value: i64, range: RangeInclusive<i64>) -> Self {
        self.arg(Arg::int(name, value, range))
    }

    /// Declares how many lines the device answers with.
    pub fn response_lines(mut self, lines: usize) -> Self {
        self.response_lines = lines;
        self
    }

    /// Declares a mechanical settle window between the write and the first read.
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn decode(mut self, decode: Decode) -> Self {
        self.decode = decode;
        self
    }

    pub fn verb(&self) -> &'static str {
        self.verb
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn expected_lines(&self) -> usize {
        self.response_lines
    }

    pub fn settle_window(&self) -> Duration {
        self.settle
    }

    pub fn decoder(&self) -> &Decode {
        &self.decode
    }

    /// Checks every integer argument against its declared range.
    pub fn validate(&self) -> Result<(), LabError> {
        self.args.iter().try_for_each(Arg::validate)
    }
}
