//! [`ControlTransport`] over QUIC.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use podium_types::{ClientMessage, ConnectionId, ServerMessage, PROTOCOL_VERSION};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, MessageReceiver, MessageSender, PeerConnection};
use crate::error::ProtocolError;
use crate::event::{ControlTransport, EventHandler, TransportEvent};
use crate::transport::QuicTransport;

/// An open controller connection.
struct Peer {
    connection: PeerConnection,
    tx: tokio::sync::Mutex<MessageSender>,
}

type PeerTable = Arc<Mutex<HashMap<ConnectionId, Arc<Peer>>>>;

/// QUIC implementation of the control transport.
///
/// Every accepted connection gets its own task, which performs the `Hello`
/// handshake and then reads frames until the stream ends.
pub struct QuicControlTransport {
    bind_ip: IpAddr,
    cert_pem: String,
    key_pem: String,
    endpoint: Mutex<Option<QuicTransport>>,
    peers: PeerTable,
}

impl QuicControlTransport {
    pub fn new(bind_ip: IpAddr, cert_pem: String, key_pem: String) -> Self {
        Self {
            bind_ip,
            cert_pem,
            key_pem,
            endpoint: Mutex::new(None),
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of connections that completed the handshake and are still open.
    pub fn connection_count(&self) -> usize {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn peer(&self, id: ConnectionId) -> Option<Arc<Peer>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl ControlTransport for QuicControlTransport {
    async fn bind(&self, port: u16) -> Result<SocketAddr, ProtocolError> {
        let addr = SocketAddr::new(self.bind_ip, port);
        let transport = QuicTransport::bind(addr, &self.cert_pem, &self.key_pem)?;
        let local = transport.local_addr()?;
        let previous = self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(transport);
        if let Some(old) = previous {
            old.close();
        }
        Ok(local)
    }

    async fn serve(&self, handler: Arc<dyn EventHandler>) -> Result<(), ProtocolError> {
        let transport = self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProtocolError::NotBound)?;

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                incoming = transport.accept_incoming() => {
                    let Some(incoming) = incoming else { break };
                    tasks.spawn(run_connection(
                        incoming,
                        Arc::clone(&handler),
                        Arc::clone(&self.peers),
                    ));
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // The endpoint is closed, so every connection task is on its way out.
        while tasks.join_next().await.is_some() {}
        debug!("accept loop finished");
        Ok(())
    }

    async fn send(&self, id: ConnectionId, msg: ServerMessage) -> Result<(), ProtocolError> {
        let peer = self.peer(id).ok_or(ProtocolError::UnknownConnection(id))?;
        let mut tx = peer.tx.lock().await;
        tx.send(&msg).await?;
        debug!(connection = %id, event = msg.event_name(), "sent");
        Ok(())
    }

    async fn broadcast(&self, msg: ServerMessage) -> Result<(), ProtocolError> {
        let peers: Vec<(ConnectionId, Arc<Peer>)> = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, peer)| (*id, Arc::clone(peer)))
            .collect();

        let mut first_error = None;
        for (id, peer) in peers {
            if let Err(e) = peer.tx.lock().await.send(&msg).await {
                warn!(connection = %id, error = %e, "broadcast send failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn force_disconnect(&self, id: ConnectionId, reason: CloseReason) {
        let peer = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match peer {
            Some(peer) => {
                peer.connection.close(reason);
                info!(connection = %id, ?reason, "connection closed by host");
            }
            None => debug!(connection = %id, "force disconnect of unknown connection"),
        }
    }

    fn close(&self) {
        let endpoint = self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let peers: Vec<Arc<Peer>> = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, peer)| peer)
            .collect();
        for peer in peers {
            peer.connection.close(CloseReason::Shutdown);
        }
        if let Some(endpoint) = endpoint {
            endpoint.close();
        }
    }
}

async fn run_connection(incoming: quinn::Incoming, handler: Arc<dyn EventHandler>, peers: PeerTable) {
    let connection = match incoming.await {
        Ok(connection) => PeerConnection::new(connection),
        Err(e) => {
            debug!(error = %e, "incoming connection failed");
            return;
        }
    };
    let remote = connection.remote_address();

    let (tx, mut rx) = match handshake(&connection).await {
        Ok(streams) => streams,
        Err(e) => {
            warn!(remote = %remote, error = %e, "controller handshake failed");
            connection.close(CloseReason::Rejected);
            return;
        }
    };

    let id = ConnectionId::new();
    peers.lock().unwrap_or_else(PoisonError::into_inner).insert(
        id,
        Arc::new(Peer {
            connection: connection.clone(),
            tx: tokio::sync::Mutex::new(tx),
        }),
    );
    debug!(connection = %id, remote = %remote, "controller connected");

    handler
        .handle(TransportEvent::Connect { id, peer: remote })
        .await;

    loop {
        match rx.recv::<ClientMessage>().await {
            Ok(Some(ClientMessage::Command(payload))) => {
                handler.handle(TransportEvent::Command { id, payload }).await;
            }
            Ok(Some(ClientMessage::PointerMove { x, y })) => {
                handler
                    .handle(TransportEvent::PointerMove { id, x, y })
                    .await;
            }
            Ok(Some(ClientMessage::Hello { .. })) => {
                debug!(connection = %id, "ignoring repeated Hello");
            }
            Ok(Some(ClientMessage::Bye) | None) => break,
            Err(ProtocolError::Deserialization(e)) => {
                warn!(connection = %id, error = %e, "dropping malformed frame");
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "connection read ended");
                break;
            }
        }
    }

    peers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    connection.close(CloseReason::Normal);
    handler.handle(TransportEvent::Disconnect { id }).await;
}

async fn handshake(
    connection: &PeerConnection,
) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
    let (tx, mut rx) = connection.accept_control_stream().await?;
    let hello: ClientMessage = rx.recv().await?.ok_or(ProtocolError::StreamClosed)?;

    match hello {
        ClientMessage::Hello { version, name } => {
            if version.major != PROTOCOL_VERSION.major {
                return Err(ProtocolError::VersionMismatch {
                    remote: version.to_string(),
                    local: PROTOCOL_VERSION.to_string(),
                });
            }
            debug!(controller = %name, %version, "received Hello");
            Ok((tx, rx))
        }
        other => Err(ProtocolError::Handshake(format!(
            "expected Hello, got {other:?}"
        ))),
    }
}
