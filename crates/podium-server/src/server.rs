//! Control server orchestration.
//!
//! [`ControlServer`] owns the lifecycle state and the session registry behind
//! one lock, routes transport events through the authorizer, forwards
//! actions to the executor, and runs the ordered shutdown sequence.
//!
//! Status is published through a `watch` channel every time the locked
//! state changes, so status reads never take the lock and never observe a
//! half-applied transition.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use podium_input::{ActionError, ActionExecutor};
use podium_protocol::{CloseReason, ControlTransport, EventHandler, TransportEvent};
use podium_types::{Action, ConnectionId, Payload, PointerPosition, ServerMessage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::authorizer::{command_token, Authorizer};
use crate::error::ServerError;
use crate::net::validate_port;
use crate::session::{ConnectOutcome, Session, SessionRegistry};
use crate::state::{Lifecycle, ServerState};

/// Default wait between the shutdown notice and closing the transport.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Upper bound on waiting for the transport loop to return after close.
const SERVE_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`ControlServer`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Grace period used by [`ControlServer::shutdown`].
    pub grace_period: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// A consistent view of the server for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: ServerState,
    pub client_connected: bool,
    pub text: String,
}

/// State guarded by the server lock.
struct Inner {
    lifecycle: Lifecycle,
    registry: SessionRegistry,
    local_addr: Option<SocketAddr>,
}

enum StopStep {
    Idle,
    Join,
    Shutdown(Option<ConnectionId>),
}

struct Core {
    inner: Mutex<Inner>,
    transport: Arc<dyn ControlTransport>,
    executor: tokio::sync::Mutex<Box<dyn ActionExecutor>>,
    authorizer: Authorizer,
    options: ServerOptions,
    status: watch::Sender<StatusSnapshot>,
    /// Last accepted pointer position. Written only under the lock.
    pointer: watch::Sender<Option<PointerPosition>>,
    /// True while the transport's serve loop is running.
    serving: watch::Sender<bool>,
}

/// The single-controller presentation control server.
///
/// Cheap to clone; clones share the same server.
#[derive(Clone)]
pub struct ControlServer {
    core: Arc<Core>,
}

impl ControlServer {
    pub fn new(
        transport: Arc<dyn ControlTransport>,
        executor: Box<dyn ActionExecutor>,
        options: ServerOptions,
    ) -> Self {
        let inner = Inner {
            lifecycle: Lifecycle::new(),
            registry: SessionRegistry::new(),
            local_addr: None,
        };
        let (status, _) = watch::channel(snapshot_of(&inner));
        let (pointer, _) = watch::channel(None);
        let (serving, _) = watch::channel(false);

        Self {
            core: Arc::new(Core {
                inner: Mutex::new(inner),
                transport,
                executor: tokio::sync::Mutex::new(executor),
                authorizer: Authorizer,
                options,
                status,
                pointer,
                serving,
            }),
        }
    }

    /// Bind `port` and serve until [`stop`](Self::stop) is called.
    ///
    /// Allowed from STOPPED and ERROR. A bind failure moves the server to
    /// ERROR and is returned. If the transport loop ends on its own, the
    /// shutdown sequence runs and the loop's error is returned.
    pub async fn start(&self, port: u32) -> Result<(), ServerError> {
        let port = self.core.begin_start(port)?;
        self.core.run(port).await
    }

    /// Like [`start`](Self::start), but runs the server on its own task.
    ///
    /// Port validation and the move to STARTING happen before this returns.
    pub fn spawn(&self, port: u32) -> Result<ServerHandle, ServerError> {
        let port = self.core.begin_start(port)?;
        let core = Arc::clone(&self.core);
        let task = tokio::spawn(async move { core.run(port).await });
        Ok(ServerHandle {
            server: self.clone(),
            task,
        })
    }

    /// Notify the controller, wait `grace`, close the transport, and end in
    /// STOPPED.
    ///
    /// A no-op in STOPPED and ERROR. If another stop is in progress, waits
    /// for it to finish. While STARTING, waits for the bind to resolve
    /// first, so the server never keeps running after this returns.
    pub async fn stop(&self, grace: Duration) -> Result<(), ServerError> {
        self.core.stop(grace).await
    }

    /// [`stop`](Self::stop) with the configured grace period.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.core.stop(self.core.options.grace_period).await
    }

    /// Release the action executor's host resources.
    pub async fn shutdown_executor(&self) -> Result<(), ServerError> {
        self.core.executor.lock().await.shutdown().await?;
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.core.status.borrow().state
    }

    pub fn status(&self) -> StatusSnapshot {
        self.core.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.core.status.subscribe()
    }

    /// Current status text, e.g. "Waiting for connection...".
    pub fn get_status(&self) -> String {
        self.core.status.borrow().text.clone()
    }

    pub fn is_client_connected(&self) -> bool {
        self.core.status.borrow().client_connected
    }

    /// Wait until the status satisfies `predicate` and return it.
    pub async fn wait_for_status(
        &self,
        mut predicate: impl FnMut(&StatusSnapshot) -> bool,
    ) -> StatusSnapshot {
        let mut rx = self.core.status.subscribe();
        let found = rx.wait_for(&mut predicate).await.map(|s| s.clone());
        // The sender lives in `core`; the channel cannot close here.
        found.unwrap_or_else(|_| self.status())
    }

    pub fn current_identity(&self) -> Option<ConnectionId> {
        self.core.lock().registry.current_identity()
    }

    pub fn session(&self) -> Option<Session> {
        self.core.lock().registry.current().cloned()
    }

    /// Last pointer position accepted from the current controller.
    pub fn pointer(&self) -> Option<PointerPosition> {
        *self.core.pointer.borrow()
    }

    /// Detail of the last failed start.
    pub fn last_error(&self) -> Option<String> {
        self.core.lock().lifecycle.last_error().map(ToString::to_string)
    }

    /// Address the transport is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.lock().local_addr
    }
}

/// A server running on its own task. See [`ControlServer::spawn`].
pub struct ServerHandle {
    server: ControlServer,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    pub fn server(&self) -> &ControlServer {
        &self.server
    }

    /// Whether the server task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the server and join its task.
    ///
    /// Returns the stop error, or else the error that ended the run (such
    /// as a bind failure).
    pub async fn stop(self, grace: Duration) -> Result<(), ServerError> {
        let stopped = self.server.stop(grace).await;
        let run = match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Other(anyhow::anyhow!("server task failed: {e}"))),
        };
        stopped.and(run)
    }
}

fn snapshot_of(inner: &Inner) -> StatusSnapshot {
    let state = inner.lifecycle.state();
    StatusSnapshot {
        state,
        client_connected: inner.registry.is_connected(),
        text: inner
            .registry
            .status_text(state, inner.lifecycle.last_error()),
    }
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Republish status. Called with the lock held after every change.
    fn publish(&self, inner: &Inner) {
        let snapshot = snapshot_of(inner);
        self.status.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn begin_start(&self, port: u32) -> Result<u16, ServerError> {
        let port = validate_port(port)?;
        let mut inner = self.lock();
        let state = inner.lifecycle.state();
        if !state.can_start() {
            return Err(ServerError::InvalidState {
                operation: "start",
                state,
            });
        }
        inner.lifecycle.transition(ServerState::Starting)?;
        self.publish(&inner);
        Ok(port)
    }

    async fn run(self: &Arc<Self>, port: u16) -> Result<(), ServerError> {
        info!(port, "starting control server");

        let addr = match self.transport.bind(port).await {
            Ok(addr) => addr,
            Err(e) => {
                error!(port, error = %e, "failed to start server");
                let mut inner = self.lock();
                inner.lifecycle.fail(e.to_string())?;
                self.publish(&inner);
                return Err(ServerError::Bind(e.to_string()));
            }
        };

        {
            let mut inner = self.lock();
            inner.lifecycle.transition(ServerState::Running)?;
            inner.local_addr = Some(addr);
            self.serving.send_replace(true);
            self.publish(&inner);
        }
        info!(%addr, "control server running");

        let pump = tokio::spawn(Arc::clone(self).pump_pointer());
        let handler: Arc<dyn EventHandler> = self.clone();
        let result = self.transport.serve(handler).await;
        pump.abort();
        self.serving.send_replace(false);

        // Still RUNNING means nobody asked the loop to stop.
        let unexpected = {
            let mut inner = self.lock();
            if inner.lifecycle.state() == ServerState::Running {
                inner.lifecycle.transition(ServerState::Stopping)?;
                self.publish(&inner);
                Some(inner.registry.current_identity())
            } else {
                None
            }
        };

        match unexpected {
            Some(session) => {
                match &result {
                    Err(e) => error!(error = %e, "transport loop failed"),
                    Ok(()) => warn!("transport loop ended without a stop request"),
                }
                self.shutdown_sequence(session, Duration::ZERO).await;
                result.map_err(ServerError::from)
            }
            None => {
                if let Err(e) = result {
                    debug!(error = %e, "transport loop ended with error during stop");
                }
                Ok(())
            }
        }
    }

    async fn stop(&self, grace: Duration) -> Result<(), ServerError> {
        let step = loop {
            let step = {
                let mut inner = self.lock();
                match inner.lifecycle.state() {
                    ServerState::Stopped | ServerState::Error => Some(StopStep::Idle),
                    ServerState::Starting => None,
                    ServerState::Stopping => Some(StopStep::Join),
                    ServerState::Running => {
                        inner.lifecycle.transition(ServerState::Stopping)?;
                        self.publish(&inner);
                        Some(StopStep::Shutdown(inner.registry.current_identity()))
                    }
                }
            };
            if let Some(step) = step {
                break step;
            }

            // Let the bind resolve, then stop whatever it left behind.
            debug!("stop requested while starting, waiting for bind");
            let mut status = self.status.subscribe();
            if status
                .wait_for(|s| s.state != ServerState::Starting)
                .await
                .is_err()
            {
                warn!("status channel closed while waiting for start");
                return Ok(());
            }
        };

        match step {
            StopStep::Idle => debug!("stop requested while not running"),
            StopStep::Join => {
                info!("stop already in progress, waiting for it");
                let mut status = self.status.subscribe();
                let finished = status
                    .wait_for(|s| s.state != ServerState::Stopping)
                    .await
                    .is_ok();
                if !finished {
                    warn!("status channel closed while waiting for stop");
                }
            }
            StopStep::Shutdown(session) => {
                info!(?grace, "stopping control server");
                self.shutdown_sequence(session, grace).await;
            }
        }
        Ok(())
    }

    /// Everything after the move to STOPPING. Each step runs even if an
    /// earlier one failed, and the server always ends in STOPPED.
    async fn shutdown_sequence(&self, session: Option<ConnectionId>, grace: Duration) {
        if let Some(id) = session {
            if let Err(e) = self.transport.send(id, ServerMessage::shutdown()).await {
                warn!(connection = %id, error = %e, "failed to send shutdown notice");
            }
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
        }

        self.transport.close();

        let mut serving = self.serving.subscribe();
        let exited = tokio::time::timeout(SERVE_EXIT_TIMEOUT, serving.wait_for(|s| !*s))
            .await
            .is_ok();
        if !exited {
            warn!("transport loop did not exit after close");
        }

        {
            let mut inner = self.lock();
            if let Some(session) = inner.registry.clear() {
                debug!(connection = %session.identity, "session cleared");
            }
            inner.local_addr = None;
            self.pointer.send_replace(None);
            if let Err(e) = inner.lifecycle.transition(ServerState::Stopped) {
                error!(error = %e, "unexpected state at end of shutdown");
            }
            self.publish(&inner);
        }
        info!("control server stopped");
    }

    async fn on_connect(&self, id: ConnectionId, peer: SocketAddr) {
        let outcome = {
            let mut inner = self.lock();
            let state = inner.lifecycle.state();
            let outcome = inner.registry.on_connect(id, Some(peer), state, |old| {
                self.transport.force_disconnect(old, CloseReason::Preempted);
            });
            if matches!(outcome, ConnectOutcome::Installed { .. }) {
                self.pointer.send_replace(None);
            }
            self.publish(&inner);
            outcome
        };

        match outcome {
            ConnectOutcome::Rejected => {
                info!(connection = %id, %peer, "rejecting connection, server not running");
                self.transport.force_disconnect(id, CloseReason::Rejected);
            }
            ConnectOutcome::AlreadyCurrent => {
                debug!(connection = %id, "repeated connect for current session");
            }
            ConnectOutcome::Installed { .. } => {
                info!(connection = %id, %peer, "controller connected");
                if let Err(e) = self.transport.send(id, ServerMessage::welcome()).await {
                    warn!(connection = %id, error = %e, "failed to send welcome");
                }
            }
        }
    }

    fn on_disconnect(&self, id: ConnectionId) {
        let cleared = {
            let mut inner = self.lock();
            let cleared = inner.registry.on_disconnect(id);
            if cleared {
                self.pointer.send_replace(None);
                self.publish(&inner);
            }
            cleared
        };
        if cleared {
            info!(connection = %id, "controller disconnected");
        }
    }

    async fn on_command(&self, id: ConnectionId, payload: &Payload) {
        // Authorize under the lock so a concurrent preemption cannot slip
        // between the identity check and dispatch.
        let verdict = {
            let inner = self.lock();
            let state = inner.lifecycle.state();
            if state != ServerState::Running {
                debug!(connection = %id, %state, "dropping command outside RUNNING");
                return;
            }
            match command_token(payload) {
                Err(e) => {
                    warn!(connection = %id, error = %e, "rejecting command payload");
                    Err(e.to_string())
                }
                Ok(token) => self
                    .authorizer
                    .authorize(token, id, inner.registry.current_identity())
                    .map_err(|rejection| {
                        warn!(connection = %id, token, %rejection, "command rejected");
                        rejection.to_string()
                    }),
            }
        };

        let action = match verdict {
            Ok(action) => action,
            Err(message) => {
                self.reply_error(id, message).await;
                return;
            }
        };

        match self.dispatch(action).await {
            Ok(()) => info!(connection = %id, %action, "command dispatched"),
            Err(e) => {
                warn!(connection = %id, %action, error = %e, "action failed");
                self.reply_error(id, format!("Failed to perform {action}: {e}"))
                    .await;
            }
        }
    }

    fn on_pointer(&self, id: ConnectionId, x: f64, y: f64) {
        let inner = self.lock();
        if inner.lifecycle.state() != ServerState::Running
            || inner.registry.current_identity() != Some(id)
        {
            trace!(connection = %id, "ignoring pointer from non-current connection");
            return;
        }
        match PointerPosition::new(x, y) {
            Ok(position) => {
                self.pointer.send_replace(Some(position));
            }
            Err(e) => debug!(connection = %id, error = %e, "dropping pointer update"),
        }
    }

    async fn dispatch(&self, action: Action) -> Result<(), ActionError> {
        let mut executor = self.executor.lock().await;
        executor.execute(action).await
    }

    /// Send an error acknowledgment to one connection only.
    async fn reply_error(&self, id: ConnectionId, message: String) {
        if let Err(e) = self.transport.send(id, ServerMessage::error(message)).await {
            debug!(connection = %id, error = %e, "failed to send error acknowledgment");
        }
    }

    /// Feed the latest pointer position to the executor. Positions that
    /// arrive while the executor is busy overwrite each other.
    async fn pump_pointer(self: Arc<Self>) {
        let mut updates = self.pointer.subscribe();
        while updates.changed().await.is_ok() {
            let latest = *updates.borrow_and_update();
            let Some(position) = latest else {
                continue;
            };
            let mut executor = self.executor.lock().await;
            if let Err(e) = executor.move_pointer(position).await {
                debug!(error = %e, "pointer update failed");
            }
        }
    }
}

#[async_trait]
impl EventHandler for Core {
    async fn handle(&self, event: TransportEvent) {
        trace!(event = event.name(), connection = %event.id(), "transport event");
        match event {
            TransportEvent::Connect { id, peer } => self.on_connect(id, peer).await,
            TransportEvent::Disconnect { id } => self.on_disconnect(id),
            TransportEvent::Command { id, payload } => self.on_command(id, &payload).await,
            TransportEvent::PointerMove { id, x, y } => self.on_pointer(id, x, y),
        }
    }
}
