//! Controller side of the control channel.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use podium_types::{ClientMessage, Payload, ServerMessage, PROTOCOL_VERSION};
use tracing::{debug, info};

use crate::connection::{MessageReceiver, MessageSender, PeerConnection};
use crate::error::ProtocolError;
use crate::tls::ServerVerification;
use crate::transport::QuicTransport;

/// A connected controller.
pub struct ControlClient {
    transport: QuicTransport,
    connection: PeerConnection,
    tx: MessageSender,
    rx: MessageReceiver,
}

impl ControlClient {
    /// Connect to a host and send the `Hello` frame.
    pub async fn connect(
        addr: SocketAddr,
        name: &str,
        verification: ServerVerification,
    ) -> Result<Self, ProtocolError> {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let transport = QuicTransport::client(local, &verification)?;
        let connection = transport.connect(addr, "localhost").await?;
        let (mut tx, rx) = connection.open_control_stream().await?;

        tx.send(&ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            name: name.to_string(),
        })
        .await?;
        info!(host = %addr, "connected to host");

        Ok(Self {
            transport,
            connection,
            tx,
            rx,
        })
    }

    /// Send a command token.
    pub async fn send_command(&mut self, token: &str) -> Result<(), ProtocolError> {
        self.send_payload(Payload::text(token)).await
    }

    /// Send an arbitrary command payload.
    pub async fn send_payload(&mut self, payload: Payload) -> Result<(), ProtocolError> {
        debug!(?payload, "sending command");
        self.tx.send(&ClientMessage::Command(payload)).await
    }

    /// Send a pointer position.
    pub async fn move_pointer(&mut self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.tx.send(&ClientMessage::PointerMove { x, y }).await
    }

    /// Wait for the next message from the host.
    ///
    /// Returns `None` when the host finished the stream. A host-initiated
    /// close surfaces as [`ProtocolError::ClosedByPeer`].
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>, ProtocolError> {
        self.rx.recv().await
    }

    /// Send `Bye` and close the connection.
    pub async fn disconnect(mut self) -> Result<(), ProtocolError> {
        let result = self.tx.send(&ClientMessage::Bye).await;
        let _ = self.tx.finish();
        self.connection.close(crate::CloseReason::Normal);
        self.transport.close();
        result
    }
}
