//! QUIC endpoint: bind, accept, and connect.

use std::net::SocketAddr;

use quinn::Endpoint;
use tracing::{debug, info};

use crate::connection::PeerConnection;
use crate::error::ProtocolError;
use crate::tls::{self, ServerVerification};

/// A QUIC endpoint.
///
/// Hosts bind with [`QuicTransport::bind`] and accept controllers;
/// controllers use [`QuicTransport::client`] and connect out.
#[derive(Clone)]
pub struct QuicTransport {
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Bind a server endpoint presenting the given certificate.
    pub fn bind(addr: SocketAddr, cert_pem: &str, key_pem: &str) -> Result<Self, ProtocolError> {
        tls::install_crypto_provider();

        let server_config = tls::server_config(cert_pem, key_pem)?;
        let endpoint = Endpoint::server(server_config, addr).map_err(|e| ProtocolError::Bind {
            addr,
            reason: e.to_string(),
        })?;

        info!(addr = %addr, "QUIC transport bound");
        Ok(Self { endpoint })
    }

    /// Create a client-only endpoint on an ephemeral local port.
    pub fn client(
        local: SocketAddr,
        verification: &ServerVerification,
    ) -> Result<Self, ProtocolError> {
        tls::install_crypto_provider();

        let mut endpoint = Endpoint::client(local).map_err(|e| ProtocolError::Bind {
            addr: local,
            reason: e.to_string(),
        })?;
        endpoint.set_default_client_config(tls::client_config(verification)?);
        Ok(Self { endpoint })
    }

    /// Wait for the next incoming connection attempt.
    ///
    /// Returns `None` once the endpoint has been closed.
    pub async fn accept_incoming(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Accept an incoming connection and complete its handshake.
    pub async fn accept(&self) -> Result<PeerConnection, ProtocolError> {
        let incoming = self
            .accept_incoming()
            .await
            .ok_or_else(|| ProtocolError::Connection("endpoint closed".to_string()))?;

        let connection = incoming
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        let remote = connection.remote_address();
        debug!(remote = %remote, "accepted connection");
        Ok(PeerConnection::new(connection))
    }

    /// Connect to a host.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
    ) -> Result<PeerConnection, ProtocolError> {
        let connection = self
            .endpoint
            .connect(addr, server_name)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        debug!(remote = %addr, "connected to host");
        Ok(PeerConnection::new(connection))
    }

    /// Get the local address this transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }

    /// Close the endpoint and every connection on it. Does not block.
    pub fn close(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
        info!("QUIC transport closed");
    }
}
