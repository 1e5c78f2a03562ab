//! # Telemetry lines
//!
//! Independently of command replies the microcontroller streams sensor lines of the form
//! `D:<number>\n`, giving the distance to the nearest obstacle in front of the car in centimeters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Prefix of a front distance telemetry line.
pub const FRONT_DISTANCE_PREFIX: &str = "D:";

/// Line terminator used by the device.
pub const LINE_TERMINATOR: u8 = b'\n';

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A parsed telemetry line.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// Distance to the nearest obstacle ahead of the car
    pub front_distance_cm: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum TmParseError {
    #[error("Telemetry line is not valid UTF-8")]
    NotUtf8,

    #[error("Unknown telemetry line {0:?}")]
    UnknownLine(String),

    #[error("Invalid front distance value {0:?}")]
    InvalidDistance(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemetryRecord {
    /// Parse a single telemetry line, without its terminator.
    ///
    /// Leading and trailing whitespace (including the `\r` of a CRLF terminator) is ignored.
    pub fn parse_line(line: &[u8]) -> Result<Self, TmParseError> {
        let line = std::str::from_utf8(line)
            .map_err(|_| TmParseError::NotUtf8)?
            .trim();

        let value = match line.strip_prefix(FRONT_DISTANCE_PREFIX) {
            Some(v) => v.trim(),
            None => return Err(TmParseError::UnknownLine(line.into())),
        };

        match value.parse::<f64>() {
            Ok(d) if d.is_finite() && d >= 0.0 => Ok(Self {
                front_distance_cm: d,
            }),
            _ => Err(TmParseError::InvalidDistance(value.into())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            TelemetryRecord::parse_line(b"D:42"),
            Ok(TelemetryRecord {
                front_distance_cm: 42.0
            })
        );
        assert_eq!(
            TelemetryRecord::parse_line(b"D:17.5\r"),
            Ok(TelemetryRecord {
                front_distance_cm: 17.5
            })
        );
        assert_eq!(
            TelemetryRecord::parse_line(b"D: 8 "),
            Ok(TelemetryRecord {
                front_distance_cm: 8.0
            })
        );
    }

    #[test]
    fn test_parse_line_rejects() {
        assert!(matches!(
            TelemetryRecord::parse_line(b"Robot Ready"),
            Err(TmParseError::UnknownLine(_))
        ));
        assert!(matches!(
            TelemetryRecord::parse_line(b"D:"),
            Err(TmParseError::InvalidDistance(_))
        ));
        assert!(matches!(
            TelemetryRecord::parse_line(b"D:-3"),
            Err(TmParseError::InvalidDistance(_))
        ));
        assert!(matches!(
            TelemetryRecord::parse_line(b"D:NaN"),
            Err(TmParseError::InvalidDistance(_))
        ));
        assert_eq!(
            TelemetryRecord::parse_line(&[b'D', b':', 0xff]),
            Err(TmParseError::NotUtf8)
        );
    }
}
