//! Notification model for the Icinga 2 event stream.
//!
//! # Wire format
//! The events API delivers one JSON object per line. Check states arrive as
//! numeric severities (`0..=3`, integer or float depending on the server
//! version); re-serialized notifications carry the state name instead so
//! cache exports stay readable.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Check state carried by a notification.
///
/// `Nil` is the sentinel for "no prior observation". It never appears on the
/// upstream wire and is not a valid parse result for rule files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    Ok,
    Warning,
    Critical,
    Unknown,
    #[default]
    Nil,
}

impl State {
    /// The upper-case state name, as used in subjects and comments.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warning => "WARNING",
            State::Critical => "CRITICAL",
            State::Unknown => "UNKNOWN",
            State::Nil => "NIL",
        }
    }

    fn from_severity(n: u64) -> Option<State> {
        match n {
            0 => Some(State::Ok),
            1 => Some(State::Warning),
            2 => Some(State::Critical),
            3 => Some(State::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for state names that are not one of `OK | WARNING | CRITICAL | UNKNOWN`.
#[derive(Debug, thiserror::Error)]
#[error("invalid check state: {0:?}")]
pub struct ParseStateError(pub String);

impl FromStr for State {
    type Err = ParseStateError;

    /// Case-insensitive parse of the four real state names.
    ///
    /// `NIL` is deliberately rejected: absence is encoded by an empty field
    /// wherever states are written down.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Ok(State::Ok),
            "WARNING" => Ok(State::Warning),
            "CRITICAL" => Ok(State::Critical),
            "UNKNOWN" => Ok(State::Unknown),
            _ => Err(ParseStateError(s.to_owned())),
        }
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StateVisitor;

        impl Visitor<'_> for StateVisitor {
            type Value = State;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a check state name or numeric severity 0..=3")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<State, E> {
                if v.eq_ignore_ascii_case("NIL") {
                    return Ok(State::Nil);
                }
                v.parse().map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(v), &self)
                })
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<State, E> {
                State::from_severity(v).ok_or_else(|| {
                    de::Error::invalid_value(de::Unexpected::Unsigned(v), &self)
                })
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<State, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(State::from_severity)
                    .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Signed(v), &self))
            }

            // Icinga emits float severities, e.g. `"state": 2.0`.
            fn visit_f64<E: de::Error>(self, v: f64) -> Result<State, E> {
                if v.fract() == 0.0 && v >= 0.0 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    if let Some(s) = State::from_severity(v as u64) {
                        return Ok(s);
                    }
                }
                Err(de::Error::invalid_value(de::Unexpected::Float(v), &self))
            }
        }

        deserializer.deserialize_any(StateVisitor)
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Result of the check that triggered a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub output: String,
}

/// One monitoring event delivered over the upstream stream.
///
/// The engine consults host, service, state and output; the remaining fields
/// pass through for local filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub notification_type: String,
    #[serde(default)]
    pub check_result: CheckResult,
}
