//! The seam between a transport and the control server.
//!
//! A transport turns network activity into [`TransportEvent`]s and hands them
//! to an [`EventHandler`]. The handler talks back through the
//! [`ControlTransport`] primitives.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use podium_types::{ConnectionId, Payload, ServerMessage};

use crate::connection::CloseReason;
use crate::error::ProtocolError;

/// An inbound event, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A controller finished its handshake.
    Connect { id: ConnectionId, peer: SocketAddr },
    /// A controller's connection ended, for any reason.
    Disconnect { id: ConnectionId },
    /// A command frame.
    Command { id: ConnectionId, payload: Payload },
    /// A pointer frame. Coordinates are unvalidated.
    PointerMove { id: ConnectionId, x: f64, y: f64 },
}

impl TransportEvent {
    /// The connection the event belongs to.
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Connect { id, .. }
            | Self::Disconnect { id }
            | Self::Command { id, .. }
            | Self::PointerMove { id, .. } => *id,
        }
    }

    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Command { .. } => "command",
            Self::PointerMove { .. } => "pointer_move",
        }
    }
}

/// Receives transport events.
///
/// Events for one connection are delivered in order; events for different
/// connections may be delivered concurrently.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: TransportEvent);
}

/// Transport primitives the control server drives.
#[async_trait]
pub trait ControlTransport: Send + Sync + 'static {
    /// Bind the listening endpoint. Returns the bound address.
    async fn bind(&self, port: u16) -> Result<SocketAddr, ProtocolError>;

    /// Accept connections and deliver their events to `handler` until
    /// [`close`](Self::close) is called. Returns `Ok` on a requested close.
    async fn serve(&self, handler: Arc<dyn EventHandler>) -> Result<(), ProtocolError>;

    /// Send a message to one connection.
    async fn send(&self, id: ConnectionId, msg: ServerMessage) -> Result<(), ProtocolError>;

    /// Send a message to every open connection.
    async fn broadcast(&self, msg: ServerMessage) -> Result<(), ProtocolError>;

    /// Close one connection. Must not block.
    fn force_disconnect(&self, id: ConnectionId, reason: CloseReason);

    /// Close the endpoint and every open connection. Must not block.
    fn close(&self);
}
