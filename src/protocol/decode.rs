//! Payload decoding rules.
//!
//! Each command declares one [`Decode`] rule. Rules never guess: a payload that
//! does not match the declared shape is a [`LabError::Decode`], never a zero or
//! a partial value.

use super::value::{DecodedValue, ShutterState, Symbol, ValvePosition};
use crate::error::LabError;

/// How to turn a payload into a [`DecodedValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decode {
    /// Blind command; any payload is ignored.
    None,
    /// Real number in the first `width` characters, truncated toward zero.
    TruncatedReal { field: &'static str, width: usize },
    /// Signed integer in the first `width` characters.
    Integer { field: &'static str, width: usize },
    /// Single digit in the first character.
    Digit { field: &'static str },
    /// `O` / `C` in the first character.
    Shutter,
    /// `1` or `2` in the first character.
    Grating,
    /// Whole payload as a signed integer.
    Number { field: &'static str },
    /// Whole payload as a real number divided by `divisor`.
    Scaled { field: &'static str, divisor: f64 },
    /// Whole payload is exactly `i`, `o` or `b`.
    Valve,
    /// Whole payload as trimmed text.
    Text { field: &'static str },
}

/// First `width` characters of `payload` (all of it if shorter).
fn head(payload: &str, width: usize) -> &str {
    payload
        .char_indices()
        .nth(width)
        .map_or(payload, |(idx, _)| &payload[..idx])
}

impl Decode {
    /// Name of the decoded field, for errors and logs.
    pub fn field(&self) -> &'static str {
        match self {
            Decode::None => "nothing",
            Decode::TruncatedReal { field, .. }
            | Decode::Integer { field, .. }
            | Decode::Digit { field }
            | Decode::Number { field }
            | Decode::Scaled { field, .. }
            | Decode::Text { field } => field,
            Decode::Shutter => "shutter",
            Decode::Grating => "grating",
            Decode::Valve => "valve position",
        }
    }

    /// Decodes `payload`. Returns `Ok(None)` only for [`Decode::None`].
    pub fn apply(&self, payload: Option<&str>) -> Result<Option<DecodedValue>, LabError> {
        if *self == Decode::None {
            return Ok(None);
        }
        let payload = payload.ok_or_else(|| {
            LabError::Protocol(format!("expected a {} payload, got none", self.field()))
        })?;
        let fail = || LabError::decode(self.field(), payload);

        let value = match self {
            Decode::None => return Ok(None),
            Decode::TruncatedReal { width, .. } => {
                let real: f64 = head(payload, *width).trim().parse().map_err(|_| fail())?;
                if !real.is_finite() {
                    return Err(fail());
                }
                DecodedValue::Integer(real.trunc() as i64)
            }
            Decode::Integer { width, .. } => {
                DecodedValue::Integer(head(payload, *width).trim().parse().map_err(|_| fail())?)
            }
            Decode::Digit { .. } => {
                let digit = payload
                    .chars()
                    .next()
                    .and_then(|c| c.to_digit(10))
                    .ok_or_else(fail)?;
                DecodedValue::Integer(i64::from(digit))
            }
            Decode::Shutter => {
                let state = payload
                    .chars()
                    .next()
                    .and_then(ShutterState::from_wire)
                    .ok_or_else(fail)?;
                DecodedValue::Symbol(Symbol::Shutter(state))
            }
            Decode::Grating => match payload.chars().next() {
                Some('1') => DecodedValue::Integer(1),
                Some('2') => DecodedValue::Integer(2),
                _ => return Err(fail()),
            },
            Decode::Number { .. } => {
                DecodedValue::Integer(payload.trim().parse().map_err(|_| fail())?)
            }
            Decode::Scaled { divisor, .. } => {
                let raw: f64 = payload.trim().parse().map_err(|_| fail())?;
                if !raw.is_finite() {
                    return Err(fail());
                }
                DecodedValue::Real(raw / divisor)
            }
            Decode::Valve => {
                let position = ValvePosition::from_wire(payload.trim()).ok_or_else(fail)?;
                DecodedValue::Symbol(Symbol::Valve(position))
            }
            Decode::Text { .. } => DecodedValue::Text(payload.trim().to_string()),
        };
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAVELENGTH: Decode = Decode::TruncatedReal {
        field: "wavelength",
        width: 7,
    };

    fn decode(rule: &Decode, payload: &str) -> Result<DecodedValue, LabError> {
        rule.apply(Some(payload)).map(|v| v.unwrap())
    }

    #[test]
    fn wavelength_round_trips_for_every_valid_value() {
        for nm in 0..=1600 {
            let reported = format!("{:.3}", nm as f64);
            assert_eq!(
                decode(&WAVELENGTH, &reported).unwrap(),
                DecodedValue::Integer(nm),
                "payload {reported}"
            );
        }
    }

    #[test]
    fn wavelength_truncates_fraction() {
        assert_eq!(decode(&WAVELENGTH, "500.000").unwrap(), DecodedValue::Integer(500));
        assert_eq!(decode(&WAVELENGTH, "549.999").unwrap(), DecodedValue::Integer(549));
        // Only the first seven characters are significant.
        assert_eq!(decode(&WAVELENGTH, "1599.9999").unwrap(), DecodedValue::Integer(1599));
    }

    #[test]
    fn unparseable_wavelength_is_an_error() {
        assert!(matches!(
            decode(&WAVELENGTH, "ERR"),
            Err(LabError::Decode { field: "wavelength", .. })
        ));
        assert!(decode(&WAVELENGTH, "").is_err());
    }

    #[test]
    fn step_uses_first_four_characters() {
        let step = Decode::Integer {
            field: "step",
            width: 4,
        };
        assert_eq!(decode(&step, "1234").unwrap(), DecodedValue::Integer(1234));
        assert_eq!(decode(&step, "-12 ").unwrap(), DecodedValue::Integer(-12));
        assert_eq!(decode(&step, "250000").unwrap(), DecodedValue::Integer(2500));
        assert!(decode(&step, "abcd").is_err());
    }

    #[test]
    fn shutter_symbols() {
        let open = decode(&Decode::Shutter, "O").unwrap();
        assert_eq!(open, DecodedValue::Symbol(Symbol::Shutter(ShutterState::Open)));
        assert_eq!(open.as_symbol().map(Symbol::code), Some(1));

        let closed = decode(&Decode::Shutter, "C").unwrap();
        assert_eq!(closed.as_symbol().map(Symbol::code), Some(0));

        for bad in ["X", "o", "", " O"] {
            assert!(decode(&Decode::Shutter, bad).is_err(), "payload {bad:?}");
        }
    }

    #[test]
    fn grating_accepts_only_one_or_two() {
        assert_eq!(decode(&Decode::Grating, "1").unwrap(), DecodedValue::Integer(1));
        assert_eq!(decode(&Decode::Grating, "2").unwrap(), DecodedValue::Integer(2));
        assert!(decode(&Decode::Grating, "3").is_err());
        assert!(decode(&Decode::Grating, "").is_err());
    }

    #[test]
    fn valve_symbols_never_default() {
        for (wire, code) in [("i", 0), ("o", 1), ("b", 2)] {
            let value = decode(&Decode::Valve, wire).unwrap();
            assert_eq!(value.as_symbol().map(Symbol::code), Some(code));
        }
        for bad in ["x", "I", "", "io"] {
            assert!(
                matches!(decode(&Decode::Valve, bad), Err(LabError::Decode { .. })),
                "payload {bad:?}"
            );
        }
    }

    #[test]
    fn voltage_is_reported_in_tenths() {
        let voltage = Decode::Scaled {
            field: "voltage",
            divisor: 10.0,
        };
        assert_eq!(decode(&voltage, "240").unwrap(), DecodedValue::Real(24.0));
        assert!(decode(&voltage, "24V").is_err());
    }

    #[test]
    fn blind_commands_ignore_payload() {
        assert_eq!(Decode::None.apply(None).unwrap(), None);
        assert_eq!(Decode::None.apply(Some("junk")).unwrap(), None);
    }

    #[test]
    fn missing_payload_is_a_protocol_error() {
        assert!(matches!(
            Decode::Grating.apply(None),
            Err(LabError::Protocol(_))
        ));
    }
}
