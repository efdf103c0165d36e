//! The single controller session and the registry that owns it.

use std::net::SocketAddr;
use std::time::SystemTime;

use podium_types::ConnectionId;
use tracing::{debug, info};

use crate::state::ServerState;

pub const STATUS_STOPPED: &str = "Server stopped";
pub const STATUS_STARTING: &str = "Starting server...";
pub const STATUS_WAITING: &str = "Waiting for connection...";
pub const STATUS_CONNECTED: &str = "Connected";

/// The currently recognized controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: ConnectionId,
    pub connected_at: SystemTime,
    pub peer: Option<SocketAddr>,
    pub active: bool,
}

impl Session {
    fn new(identity: ConnectionId, peer: Option<SocketAddr>) -> Self {
        Self {
            identity,
            connected_at: SystemTime::now(),
            peer,
            active: true,
        }
    }
}

/// What [`SessionRegistry::on_connect`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The server is not running; no session was formed.
    Rejected,
    /// The connection is now the session. `evicted` is the identity it
    /// replaced, already force-closed.
    Installed { evicted: Option<ConnectionId> },
    /// The connection already owned the session.
    AlreadyCurrent,
}

/// Holds at most one [`Session`].
///
/// Not synchronized on its own; the control server keeps it behind the
/// same lock as the lifecycle state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    current: Option<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a new connection while the server is in `state`.
    ///
    /// "Most recent connection wins": an existing session with a different
    /// identity is passed to `evict` before the new one is installed.
    pub fn on_connect(
        &mut self,
        identity: ConnectionId,
        peer: Option<SocketAddr>,
        state: ServerState,
        evict: impl FnOnce(ConnectionId),
    ) -> ConnectOutcome {
        if !state.accepts_sessions() {
            debug!(connection = %identity, %state, "connection outside RUNNING");
            return ConnectOutcome::Rejected;
        }

        let evicted = match &self.current {
            Some(session) if session.identity == identity => {
                return ConnectOutcome::AlreadyCurrent;
            }
            Some(session) => {
                let old = session.identity;
                info!(old = %old, new = %identity, "preempting controller session");
                evict(old);
                Some(old)
            }
            None => None,
        };

        self.current = Some(Session::new(identity, peer));
        ConnectOutcome::Installed { evicted }
    }

    /// Handle a disconnect. Clears the session only if `identity` owns it.
    ///
    /// Returns whether the session was cleared.
    pub fn on_disconnect(&mut self, identity: ConnectionId) -> bool {
        if self.current_identity() == Some(identity) {
            self.current = None;
            true
        } else {
            debug!(connection = %identity, "ignoring disconnect of superseded connection");
            false
        }
    }

    /// Drop the session unconditionally.
    pub fn clear(&mut self) -> Option<Session> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn current_identity(&self) -> Option<ConnectionId> {
        self.current.as_ref().map(|s| s.identity)
    }

    /// Whether an active session exists.
    pub fn is_connected(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.active)
    }

    /// Human-readable status for the given server state.
    pub fn status_text(&self, state: ServerState, last_error: Option<&str>) -> String {
        match state {
            ServerState::Running if self.is_connected() => STATUS_CONNECTED.to_string(),
            ServerState::Running => STATUS_WAITING.to_string(),
            ServerState::Starting => STATUS_STARTING.to_string(),
            ServerState::Stopping | ServerState::Stopped => STATUS_STOPPED.to_string(),
            ServerState::Error => {
                format!("Failed to start server: {}", last_error.unwrap_or("unknown error"))
            }
        }
    }
}
