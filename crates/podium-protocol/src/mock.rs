//! In-memory transport for testing the control server.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use podium_types::{ConnectionId, Payload, ServerMessage};
use tokio::sync::watch;

use crate::connection::CloseReason;
use crate::error::ProtocolError;
use crate::event::{ControlTransport, EventHandler, TransportEvent};

/// What the serve loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServeSignal {
    Idle,
    Closed,
    Failed(String),
}

#[derive(Default)]
struct MockState {
    bind_error: Option<String>,
    bound_port: Option<u16>,
    fail_sends: bool,
    sent: Vec<(ConnectionId, ServerMessage)>,
    broadcasts: Vec<ServerMessage>,
    forced: Vec<(ConnectionId, CloseReason)>,
    close_count: usize,
}

struct Shared {
    state: Mutex<MockState>,
    signal: watch::Sender<ServeSignal>,
    handler: watch::Sender<Option<Arc<dyn EventHandler>>>,
}

/// Mock transport.
///
/// Tests keep a [`MockTransportHandle`] to inject events as if they came
/// from the network and to inspect what the server sent.
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(ServeSignal::Idle);
        let (handler, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                signal,
                handler,
            }),
        }
    }

    /// Get a clonable handle for driving and observing the transport.
    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl ControlTransport for MockTransport {
    async fn bind(&self, port: u16) -> Result<SocketAddr, ProtocolError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let mut state = self.shared.state.lock().unwrap();
        if let Some(reason) = state.bind_error.clone() {
            return Err(ProtocolError::Bind { addr, reason });
        }
        state.bound_port = Some(port);
        self.shared.signal.send_replace(ServeSignal::Idle);
        Ok(addr)
    }

    async fn serve(&self, handler: Arc<dyn EventHandler>) -> Result<(), ProtocolError> {
        let mut signal = self.shared.signal.subscribe();
        self.shared.handler.send_replace(Some(handler));

        let outcome = signal
            .wait_for(|s| *s != ServeSignal::Idle)
            .await
            .map(|s| s.clone())
            .unwrap_or(ServeSignal::Closed);

        self.shared.handler.send_replace(None);
        match outcome {
            ServeSignal::Failed(reason) => Err(ProtocolError::Connection(reason)),
            _ => Ok(()),
        }
    }

    async fn send(&self, id: ConnectionId, msg: ServerMessage) -> Result<(), ProtocolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.fail_sends {
            return Err(ProtocolError::Connection("mock send failure".to_string()));
        }
        state.sent.push((id, msg));
        Ok(())
    }

    async fn broadcast(&self, msg: ServerMessage) -> Result<(), ProtocolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.fail_sends {
            return Err(ProtocolError::Connection("mock send failure".to_string()));
        }
        state.broadcasts.push(msg);
        Ok(())
    }

    fn force_disconnect(&self, id: ConnectionId, reason: CloseReason) {
        self.shared.state.lock().unwrap().forced.push((id, reason));
    }

    fn close(&self) {
        self.shared.state.lock().unwrap().close_count += 1;
        self.shared.signal.send_replace(ServeSignal::Closed);
    }
}

/// Clonable driver/observer handle for [`MockTransport`].
#[derive(Clone)]
pub struct MockTransportHandle {
    shared: Arc<Shared>,
}

impl MockTransportHandle {
    /// Make the next `bind` fail with `reason`.
    pub fn fail_bind(&self, reason: &str) {
        self.shared.state.lock().unwrap().bind_error = Some(reason.to_string());
    }

    /// Let `bind` succeed again.
    pub fn clear_bind_error(&self) {
        self.shared.state.lock().unwrap().bind_error = None;
    }

    /// Make every `send`/`broadcast` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.state.lock().unwrap().fail_sends = fail;
    }

    /// End the serve loop with an error, as a crashed transport would.
    pub fn crash(&self, reason: &str) {
        self.shared
            .signal
            .send_replace(ServeSignal::Failed(reason.to_string()));
    }

    /// Deliver an event to the server, waiting until it is serving.
    pub async fn inject(&self, event: TransportEvent) {
        let mut rx = self.shared.handler.subscribe();
        let handler = match rx.wait_for(Option::is_some).await {
            Ok(handler) => handler.clone(),
            Err(_) => return,
        };
        if let Some(handler) = handler {
            handler.handle(event).await;
        }
    }

    pub async fn connect(&self, id: ConnectionId) {
        self.inject(TransportEvent::Connect {
            id,
            peer: SocketAddr::from((Ipv4Addr::LOCALHOST, 40000)),
        })
        .await;
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        self.inject(TransportEvent::Disconnect { id }).await;
    }

    pub async fn command(&self, id: ConnectionId, payload: Payload) {
        self.inject(TransportEvent::Command { id, payload }).await;
    }

    pub async fn pointer(&self, id: ConnectionId, x: f64, y: f64) {
        self.inject(TransportEvent::PointerMove { id, x, y }).await;
    }

    /// Whether a serve loop is currently running.
    pub fn is_serving(&self) -> bool {
        self.shared.handler.borrow().is_some()
    }

    /// Port passed to the last successful `bind`.
    pub fn bound_port(&self) -> Option<u16> {
        self.shared.state.lock().unwrap().bound_port
    }

    /// Messages sent to one connection, in order.
    pub fn sent_to(&self, id: ConnectionId) -> Vec<ServerMessage> {
        self.shared
            .state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Every directed message, in order.
    pub fn sent(&self) -> Vec<(ConnectionId, ServerMessage)> {
        self.shared.state.lock().unwrap().sent.clone()
    }

    pub fn broadcasts(&self) -> Vec<ServerMessage> {
        self.shared.state.lock().unwrap().broadcasts.clone()
    }

    /// Connections closed by the server, in order.
    pub fn forced_disconnects(&self) -> Vec<(ConnectionId, CloseReason)> {
        self.shared.state.lock().unwrap().forced.clone()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.shared.state.lock().unwrap().close_count
    }
}
