//! # Drive commands
//!
//! The host drives the car by writing a single ASCII byte per command. The microcontroller replies
//! with a single byte, `A` if the command was accepted or `E` if it did not recognise it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Reply byte sent by the device when a command was accepted.
pub const ACK_BYTE: u8 = b'A';

/// Reply byte sent by the device when a command was not recognised.
pub const REJECT_BYTE: u8 = b'E';

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A drive command understood by the microcontroller.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

/// Result of sending a command to the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Ack {
    /// The device accepted the command (`A`)
    Acked,

    /// The device reported the byte was unrecognised (`E`)
    Rejected,

    /// No reply within the read window, or a reply which was neither `A` nor `E`. Contains the
    /// byte that was observed, if any.
    NoResponse(Option<u8>),
}

/// The class of an [`Ack`], without the observed byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub enum AckClass {
    Acked,
    Rejected,
    NoResponse,
}

/// Errors parsing a [`Command`] from text.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CommandParseError {
    #[error("Expected exactly one of F, B, L, R, or S, found {0:?}")]
    Invalid(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Command {
    /// All commands, in wire letter order `F B L R S`.
    pub const ALL: [Command; 5] = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
    ];

    /// The byte written to the serial line for this command.
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Forward => b'F',
            Command::Backward => b'B',
            Command::Left => b'L',
            Command::Right => b'R',
            Command::Stop => b'S',
        }
    }

    /// Get the command for a wire byte, or `None` if the byte isn't a command.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'F' => Some(Command::Forward),
            b'B' => Some(Command::Backward),
            b'L' => Some(Command::Left),
            b'R' => Some(Command::Right),
            b'S' => Some(Command::Stop),
            _ => None,
        }
    }

    /// The wire letter as a `char`.
    pub fn letter(self) -> char {
        self.to_byte() as char
    }

    /// True if this command makes the car move.
    pub fn is_motion(self) -> bool {
        self != Command::Stop
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Command {
    type Err = CommandParseError;

    /// Parse a command from its single wire letter. Surrounding whitespace is not accepted, callers
    /// which need leniency should trim first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [b] => Command::from_byte(*b).ok_or_else(|| CommandParseError::Invalid(s.into())),
            _ => Err(CommandParseError::Invalid(s.into())),
        }
    }
}

impl Ack {
    /// Classify the reply read after a command was written.
    pub fn from_reply(reply: Option<u8>) -> Self {
        match reply {
            Some(ACK_BYTE) => Ack::Acked,
            Some(REJECT_BYTE) => Ack::Rejected,
            other => Ack::NoResponse(other),
        }
    }

    pub fn class(&self) -> AckClass {
        match self {
            Ack::Acked => AckClass::Acked,
            Ack::Rejected => AckClass::Rejected,
            Ack::NoResponse(_) => AckClass::NoResponse,
        }
    }

    /// Returns true if `byte` is one of the reply bytes the device sends after a command.
    pub fn is_reply_byte(byte: u8) -> bool {
        byte == ACK_BYTE || byte == REJECT_BYTE
    }
}

impl Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ack::Acked => write!(f, "ACK"),
            Ack::Rejected => write!(f, "REJECTED"),
            Ack::NoResponse(Some(b)) => write!(f, "no response (got {:?})", *b as char),
            Ack::NoResponse(None) => write!(f, "no response (got nothing)"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wire_bytes() {
        let letters: Vec<u8> = Command::ALL.iter().map(|c| c.to_byte()).collect();
        assert_eq!(letters, b"FBLRS".to_vec());

        for cmd in Command::ALL.iter() {
            assert_eq!(Command::from_byte(cmd.to_byte()), Some(*cmd));
        }

        assert_eq!(Command::from_byte(b'X'), None);
        assert_eq!(Command::from_byte(b'f'), None);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("L".parse::<Command>(), Ok(Command::Left));
        assert!("X".parse::<Command>().is_err());
        assert!("FF".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
        assert!(" S".parse::<Command>().is_err());
    }

    #[test]
    fn test_ack_from_reply() {
        assert_eq!(Ack::from_reply(Some(b'A')), Ack::Acked);
        assert_eq!(Ack::from_reply(Some(b'E')), Ack::Rejected);
        assert_eq!(Ack::from_reply(Some(b'D')), Ack::NoResponse(Some(b'D')));
        assert_eq!(Ack::from_reply(None), Ack::NoResponse(None));
        assert_eq!(Ack::from_reply(Some(b'?')).class(), AckClass::NoResponse);
    }

    #[test]
    fn test_is_motion() {
        assert!(!Command::Stop.is_motion());
        assert!(Command::Forward.is_motion());
        assert!(Command::Right.is_motion());
    }
}
