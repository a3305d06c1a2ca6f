//! Typed values decoded from instrument payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monochromator shutter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutterState {
    /// `C` on the wire, logical 0.
    Closed,
    /// `O` on the wire, logical 1.
    Open,
}

impl ShutterState {
    /// Logical value exposed to the attribute layer.
    pub fn code(self) -> i64 {
        match self {
            ShutterState::Closed => 0,
            ShutterState::Open => 1,
        }
    }

    /// Wire token used by `SHUTTER O|C`.
    pub fn token(self) -> &'static str {
        match self {
            ShutterState::Closed => "C",
            ShutterState::Open => "O",
        }
    }

    pub(crate) fn from_wire(c: char) -> Option<Self> {
        match c {
            'O' => Some(ShutterState::Open),
            'C' => Some(ShutterState::Closed),
            _ => None,
        }
    }
}

/// Pump valve position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValvePosition {
    /// `i`, logical 0.
    Input,
    /// `o`, logical 1.
    Output,
    /// `b`, logical 2.
    Bypass,
}

impl ValvePosition {
    /// Logical value exposed to the attribute layer.
    pub fn code(self) -> i64 {
        match self {
            ValvePosition::Input => 0,
            ValvePosition::Output => 1,
            ValvePosition::Bypass => 2,
        }
    }

    /// Inverse of [`ValvePosition::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ValvePosition::Input),
            1 => Some(ValvePosition::Output),
            2 => Some(ValvePosition::Bypass),
            _ => None,
        }
    }

    /// Single-letter verb that moves the valve here.
    pub fn verb(self) -> &'static str {
        match self {
            ValvePosition::Input => "I",
            ValvePosition::Output => "O",
            ValvePosition::Bypass => "B",
        }
    }

    pub(crate) fn from_wire(s: &str) -> Option<Self> {
        match s {
            "i" => Some(ValvePosition::Input),
            "o" => Some(ValvePosition::Output),
            "b" => Some(ValvePosition::Bypass),
            _ => None,
        }
    }
}

/// Enumerated symbols reported by the instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbol {
    Shutter(ShutterState),
    Valve(ValvePosition),
}

impl Symbol {
    /// Logical integer for the symbol.
    pub fn code(self) -> i64 {
        match self {
            Symbol::Shutter(s) => s.code(),
            Symbol::Valve(v) => v.code(),
        }
    }
}

/// A payload after decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodedValue {
    Integer(i64),
    Real(f64),
    Symbol(Symbol),
    Text(String),
}

impl DecodedValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DecodedValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            DecodedValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            DecodedValue::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Integer(v) => write!(f, "{}", v),
            DecodedValue::Real(v) => write!(f, "{}", v),
            DecodedValue::Symbol(s) => write!(f, "{}", s.code()),
            DecodedValue::Text(s) => f.write_str(s),
        }
    }
}
