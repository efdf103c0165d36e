//! Command authorization: payload validation, the token table, and the
//! single-controller gate.

use podium_types::{Action, ConnectionId, Payload};
use thiserror::Error;

/// Accepted command tokens. Matched after trimming, ignoring ASCII case.
pub const COMMAND_TABLE: [(&str, Action); 8] = [
    ("NEXT_SLIDE", Action::Advance),
    ("FORWARD", Action::Advance),
    ("PREV_SLIDE", Action::Retreat),
    ("BACK", Action::Retreat),
    ("START_SLIDESHOW", Action::Begin),
    ("END_SLIDESHOW", Action::Terminate),
    ("HOME", Action::JumpFirst),
    ("END", Action::JumpLast),
];

/// A command payload that is not a usable token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Invalid command payload: expected text, got {0}")]
    NotText(&'static str),
}

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Not the active controller")]
    Unauthorized,
}

/// Extract the command token from a payload. Only text is accepted.
pub fn command_token(payload: &Payload) -> Result<&str, PayloadError> {
    match payload {
        Payload::Text(token) => Ok(token.as_str()),
        other => Err(PayloadError::NotText(other.kind())),
    }
}

/// Look a token up in [`COMMAND_TABLE`].
pub fn lookup(token: &str) -> Option<Action> {
    let token = token.trim();
    COMMAND_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
        .map(|&(_, action)| action)
}

/// Decides whether a command from a connection becomes an [`Action`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Authorizer;

impl Authorizer {
    /// Authorize `token` sent by `source` while `current` holds the session.
    ///
    /// Checks run in order: empty token, then session ownership, then the
    /// table. A connection that does not own the session never learns
    /// whether its token was valid.
    pub fn authorize(
        self,
        token: &str,
        source: ConnectionId,
        current: Option<ConnectionId>,
    ) -> Result<Action, Rejection> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Rejection::Empty);
        }
        if current != Some(source) {
            return Err(Rejection::Unauthorized);
        }
        lookup(token).ok_or_else(|| Rejection::Unknown(token.to_string()))
    }
}
