//! Server lifecycle state machine.
//!
//! ```text
//! STOPPED --start--> STARTING --bound--> RUNNING --stop--> STOPPING --done--> STOPPED
//!                       |                                          
//!                       +--bind failed--> ERROR --start--> STARTING
//! ```

use crate::error::ServerError;

/// Lifecycle state of the control server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Not listening. Initial state.
    Stopped,
    /// Binding the transport.
    Starting,
    /// Listening and routing events.
    Running,
    /// Shutdown sequence in progress.
    Stopping,
    /// The last start attempt failed.
    Error,
}

impl ServerState {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (Self::Stopped | Self::Error, Self::Starting)
                | (Self::Starting, Self::Running | Self::Error)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// Whether a `start` may begin from this state.
    pub fn can_start(self) -> bool {
        self.can_transition_to(Self::Starting)
    }

    /// Whether controller sessions may exist in this state.
    pub fn accepts_sessions(self) -> bool {
        self == Self::Running
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// The current state plus the detail of the last failure.
#[derive(Debug)]
pub struct Lifecycle {
    state: ServerState,
    last_error: Option<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ServerState::Stopped,
            last_error: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Detail recorded by the last transition into [`ServerState::Error`].
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Move to `next`, refusing edges that are not in the graph.
    ///
    /// Entering [`ServerState::Starting`] clears the recorded error.
    pub fn transition(&mut self, next: ServerState) -> Result<ServerState, ServerError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(ServerError::InvalidTransition { from, to: next });
        }
        if next == ServerState::Starting {
            self.last_error = None;
        }
        self.state = next;
        tracing::debug!(%from, to = %next, "lifecycle transition");
        Ok(from)
    }

    /// Record a start failure and move to [`ServerState::Error`].
    pub fn fail(&mut self, detail: impl Into<String>) -> Result<ServerState, ServerError> {
        let from = self.transition(ServerState::Error)?;
        self.last_error = Some(detail.into());
        Ok(from)
    }
}
