//! Action executor backends for podium.
//!
//! The control server decides *which* [`Action`] a controller asked for;
//! an [`ActionExecutor`] decides how it reaches the presentation. The
//! uinput backend (Linux) presses real keys; [`DryRunExecutor`] only logs.

use async_trait::async_trait;
use podium_types::{Action, PointerPosition};
use tracing::info;

pub mod error;
pub mod keys;

#[cfg(feature = "linux")]
pub mod linux;

#[cfg(feature = "mock")]
pub mod mock;

pub use error::ActionError;
pub use keys::{key_for, HostKey};

/// Performs presentation actions on the host.
#[async_trait]
pub trait ActionExecutor: Send + 'static {
    /// Perform one action, e.g. press the key that advances the slide.
    async fn execute(&mut self, action: Action) -> Result<(), ActionError>;

    /// Move the on-screen pointer. Best effort.
    async fn move_pointer(&mut self, position: PointerPosition) -> Result<(), ActionError>;

    /// Release every host resource held by the backend.
    async fn shutdown(&mut self) -> Result<(), ActionError>;
}

/// Executor that logs what it would do and touches nothing.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&mut self, action: Action) -> Result<(), ActionError> {
        info!(%action, key = ?key_for(action), "dry run: would press key");
        Ok(())
    }

    async fn move_pointer(&mut self, position: PointerPosition) -> Result<(), ActionError> {
        tracing::trace!(x = position.x(), y = position.y(), "dry run: pointer");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ActionError> {
        Ok(())
    }
}
