//! Protocol and transport errors.

use std::net::SocketAddr;

use podium_types::ConnectionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    #[error("transport is not bound")]
    NotBound,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection closed by peer (code {code}): {reason}")]
    ClosedByPeer { code: u64, reason: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("incompatible protocol version: remote {remote}, local {local}")]
    VersionMismatch { remote: String, local: String },

    #[error("no open connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("frame of {0} bytes exceeds the maximum message size")]
    FrameTooLarge(u32),

    #[error("stream closed unexpectedly")]
    StreamClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("server certificate fingerprint {actual} does not match pinned {expected}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error(transparent)]
    Quinn(#[from] quinn::ConnectionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
