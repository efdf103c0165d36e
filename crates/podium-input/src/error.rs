//! Action executor errors.

use podium_types::Action;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed to create virtual device: {0}")]
    VirtualDeviceCreate(String),

    #[error("failed to perform {action}: {reason}")]
    Execute { action: Action, reason: String },

    #[error("failed to move pointer: {0}")]
    Pointer(String),

    #[error("executor has been shut down")]
    ShutDown,

    #[error("backend not available on this platform")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
