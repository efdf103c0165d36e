//! Control server errors.

use thiserror::Error;

use crate::state::ServerState;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("cannot {operation} while the server is {state}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: ServerState, to: ServerState },

    #[error("failed to start server: {0}")]
    Bind(String),

    #[error("no free port in range {start}..{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("transport error: {0}")]
    Transport(#[from] podium_protocol::ProtocolError),

    #[error("action error: {0}")]
    Action(#[from] podium_input::ActionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
