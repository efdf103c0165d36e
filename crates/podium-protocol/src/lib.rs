//! QUIC transport layer and wire protocol for podium.
//!
//! This crate handles QUIC connection management (via quinn), message
//! serialisation/deserialisation (via bincode v2), and the
//! [`ControlTransport`] seam the control server is written against.

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod quic;
pub mod tls;
pub mod transport;
pub mod wire;

#[cfg(feature = "mock")]
pub mod mock;

pub use client::ControlClient;
pub use connection::{CloseReason, MessageReceiver, MessageSender, PeerConnection};
pub use error::ProtocolError;
pub use event::{ControlTransport, EventHandler, TransportEvent};
pub use quic::QuicControlTransport;
pub use tls::{certificate_fingerprint, ServerVerification};
pub use transport::QuicTransport;
