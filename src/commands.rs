//! Command types and the payload parser.
//!
//! Commands arrive as short ASCII payloads on the device's command topic:
//!
//! | Payload | Command |
//! |---------|---------|
//! | `SHOWER ON` | [`Command::PowerOn`] |
//! | `SHOWER OFF` | [`Command::PowerOff`] |
//! | `ROTATE;<degrees>` | [`Command::Rotate`] |
//!
//! The payload is split on `;` into a command token followed by arguments.
//! Parsing is pure: malformed payloads produce a [`ParseError`] and never a
//! half-built command, so the state machine only ever sees valid input.
//!
//! # Example
//!
//! ```rust
//! use servo_node::{parse, Command, ParseError};
//!
//! assert_eq!(parse("SHOWER ON"), Ok(Command::PowerOn));
//!
//! let cmd = parse("ROTATE;90").unwrap();
//! assert_eq!(cmd.angle().map(|a| a.degrees()), Some(90.0));
//!
//! assert!(matches!(parse("ROTATE;200"), Err(ParseError::InvalidArgument(_))));
//! assert!(matches!(parse("FOO"), Err(ParseError::UnknownCommand(_))));
//! ```

extern crate alloc;

use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use thiserror::Error;

use crate::angle::Angle;

/// Separator between the command token and its arguments.
pub const DELIMITER: char = ';';

/// Token that starts the servo.
pub const TOKEN_POWER_ON: &str = "SHOWER ON";

/// Token that stops the servo and ends the device lifecycle.
pub const TOKEN_POWER_OFF: &str = "SHOWER OFF";

/// Token that moves the servo to an angle given as its single argument.
pub const TOKEN_ROTATE: &str = "ROTATE";

/// A validated device command.
///
/// Built only by [`parse`]; the angle inside [`Rotate`](Self::Rotate) is
/// always within `0.0..=180.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Start the PWM output at the 0° duty cycle.
    PowerOn,
    /// Stop the PWM output and move the device to its terminal state.
    PowerOff,
    /// Move the servo to the given angle.
    Rotate(Angle),
}

impl Command {
    /// Returns the rotation target, if this is a [`Rotate`](Self::Rotate).
    pub fn angle(&self) -> Option<Angle> {
        match self {
            Self::Rotate(angle) => Some(*angle),
            _ => None,
        }
    }

    /// Renders the command in its wire format.
    ///
    /// ```rust
    /// use servo_node::{parse, Command};
    ///
    /// let cmd = parse("ROTATE;45.5").unwrap();
    /// assert_eq!(cmd.to_payload(), "ROTATE;45.5");
    /// assert_eq!(Command::PowerOff.to_payload(), "SHOWER OFF");
    /// ```
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOn => f.write_str(TOKEN_POWER_ON),
            Self::PowerOff => f.write_str(TOKEN_POWER_OFF),
            Self::Rotate(angle) => write!(f, "{}{}{}", TOKEN_ROTATE, DELIMITER, angle.degrees()),
        }
    }
}

/// What was wrong with the argument of a `ROTATE` command.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ArgumentError {
    /// No angle was given.
    #[error("missing angle argument")]
    Missing,
    /// The argument is not a floating point number.
    #[error("angle {0:?} is not a number")]
    NotANumber(String),
    /// The number is NaN, infinite or outside `0..=180`.
    #[error("angle {0} is outside 0..=180")]
    OutOfRange(f32),
    /// More arguments than the single angle were given.
    #[error("expected a single angle argument, got {0}")]
    Unexpected(usize),
}

/// Why a payload could not be turned into a [`Command`].
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ParseError {
    /// The command token is not recognised.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    /// The command token is known but its argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),
}

/// Parses a raw payload into a [`Command`].
///
/// Surrounding whitespace on the token and on each argument is ignored.
/// `SHOWER ON` and `SHOWER OFF` ignore any arguments; `ROTATE` requires
/// exactly one.
pub fn parse(payload: &str) -> Result<Command, ParseError> {
    let mut parts = payload.split(DELIMITER).map(str::trim);
    // `split` always yields at least one item
    let token = parts.next().unwrap_or_default();

    match token {
        TOKEN_POWER_ON => Ok(Command::PowerOn),
        TOKEN_POWER_OFF => Ok(Command::PowerOff),
        TOKEN_ROTATE => {
            let raw = parts.next().ok_or(ArgumentError::Missing)?;
            let extra = parts.count();
            if extra > 0 {
                return Err(ArgumentError::Unexpected(extra + 1).into());
            }
            Ok(Command::Rotate(parse_angle(raw)?))
        }
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

fn parse_angle(raw: &str) -> Result<Angle, ArgumentError> {
    if raw.is_empty() {
        return Err(ArgumentError::Missing);
    }
    let degrees: f32 = raw
        .parse()
        .map_err(|_| ArgumentError::NotANumber(raw.to_string()))?;
    Angle::new(degrees).ok_or(ArgumentError::OutOfRange(degrees))
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
