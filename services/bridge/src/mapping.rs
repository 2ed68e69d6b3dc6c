//! Rule table mapping event conditions to ticket actions.
//!
//! # Format
//! One rule per line, four comma-separated fields, `#` starts a line comment:
//!
//! ```text
//! # state, old state, owned, action
//! WARNING,,false,create
//! WARNING,CRITICAL,false,comment
//! OK,WARNING,false,delete
//! ```
//!
//! - `state`: one of OK, WARNING, CRITICAL, UNKNOWN (case-insensitive).
//! - `old state`: same names; empty means "no prior event".
//! - `owned`: true or false (case-insensitive).
//! - `action`: `delete`, `comment`, `create`, `ignore`, or `status:<target>`.
//!
//! The first matching rule wins, so order matters. Parsing stops at the
//! first malformed record.

use icinga_client::State;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Example rule table emitted next to the example configuration.
///
/// Opens a ticket when a check leaves OK, comments on further changes while
/// the ticket is unowned, comments instead of closing when a human took the
/// ticket, and deletes on recovery.
pub const EXAMPLE_MAPPINGS: &str = "\
# state, old state, owned, action
OK,,false,ignore
OK,WARNING,false,delete
OK,CRITICAL,false,delete
OK,UNKNOWN,false,delete
OK,WARNING,true,comment
OK,CRITICAL,true,comment
OK,UNKNOWN,true,comment
WARNING,,false,create
WARNING,WARNING,false,comment
WARNING,CRITICAL,false,comment
WARNING,UNKNOWN,false,comment
CRITICAL,,false,create
CRITICAL,WARNING,false,comment
CRITICAL,CRITICAL,false,comment
CRITICAL,UNKNOWN,false,comment
UNKNOWN,,false,create
UNKNOWN,WARNING,false,comment
UNKNOWN,CRITICAL,false,comment
UNKNOWN,UNKNOWN,false,comment
";

// ---------------------------------------------------------------------------
// Condition & Action
// ---------------------------------------------------------------------------

/// The properties an event must have to match a rule. Equality is structural.
///
/// `old_state == Nil` covers both "no prior event" and "the prior event's
/// ticket is closed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub state: State,
    pub old_state: State,
    pub owned: bool,
}

/// What to do with a matched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ignore,
    Delete,
    Comment,
    Create,
    Status { target: String, invalidate: bool },
}

/// One rule: condition plus action.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub condition: Condition,
    pub action: Action,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected 4 fields, got {count}")]
    FieldCount { line: usize, count: usize },
    #[error("line {line}: field {field}: {reason}")]
    Field {
        line: usize,
        field: &'static str,
        reason: String,
    },
    #[error("line {line}: the three-field status action is deprecated, use status:<target>")]
    DeprecatedStatusForm { line: usize },
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Read mappings from a rule file.
pub fn load_mappings(path: &Path) -> Result<Vec<Mapping>, MappingError> {
    let file = File::open(path)?;
    read_mappings(&mut BufReader::new(file))
}

/// Read mappings in file order, failing on the first malformed record.
pub fn read_mappings(r: &mut dyn BufRead) -> Result<Vec<Mapping>, MappingError> {
    let mut mappings = Vec::new();

    for (idx, line) in r.lines().enumerate() {
        let lineno = idx + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            // The historical form spelled status as its own three fields:
            // `state,old,owned,status,<target>,<invalidate>`.
            if fields.len() == 6 && fields[3].eq_ignore_ascii_case("status") {
                return Err(MappingError::DeprecatedStatusForm { line: lineno });
            }
            return Err(MappingError::FieldCount {
                line: lineno,
                count: fields.len(),
            });
        }

        let state: State = fields[0].parse().map_err(|_| MappingError::Field {
            line: lineno,
            field: "state",
            reason: format!("invalid state {:?}", fields[0]),
        })?;

        let old_state = if fields[1].is_empty() {
            State::Nil
        } else {
            fields[1].parse().map_err(|_| MappingError::Field {
                line: lineno,
                field: "old state",
                reason: format!("invalid state {:?}", fields[1]),
            })?
        };

        let owned = parse_bool(fields[2]).ok_or_else(|| MappingError::Field {
            line: lineno,
            field: "owned",
            reason: format!("expected true or false, got {:?}", fields[2]),
        })?;

        let action = parse_action(fields[3]).map_err(|reason| MappingError::Field {
            line: lineno,
            field: "action",
            reason,
        })?;

        mappings.push(Mapping {
            condition: Condition {
                state,
                old_state,
                owned,
            },
            action,
        });
    }

    Ok(mappings)
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_action(s: &str) -> Result<Action, String> {
    match s {
        "delete" => Ok(Action::Delete),
        "comment" => Ok(Action::Comment),
        "create" => Ok(Action::Create),
        "ignore" => Ok(Action::Ignore),
        "status" => Err("status needs a target, use status:<target>".to_owned()),
        _ => {
            if let Some(target) = s.strip_prefix("status:") {
                let target = target.trim();
                if target.is_empty() {
                    return Err("status target must not be empty".to_owned());
                }
                // The colon form always forgets the event once the status
                // change went through.
                return Ok(Action::Status {
                    target: target.to_owned(),
                    invalidate: true,
                });
            }
            Err(format!("unknown action {s:?}"))
        }
    }
}
