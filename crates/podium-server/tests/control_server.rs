//! Integration tests driving the control server through the mock transport
//! and mock executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use podium_input::mock::{MockExecutor, MockExecutorHandle};
use podium_protocol::mock::{MockTransport, MockTransportHandle};
use podium_protocol::CloseReason;
use podium_server::{
    ControlServer, ServerError, ServerHandle, ServerOptions, ServerState, StatusSnapshot,
};
use podium_types::{Action, ConnectionId, Payload, PointerPosition, ServerMessage};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    server: ControlServer,
    transport: MockTransportHandle,
    executor: MockExecutorHandle,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();

    let transport = MockTransport::new();
    let executor = MockExecutor::new();
    let transport_handle = transport.handle();
    let executor_handle = executor.handle();
    let server = ControlServer::new(
        Arc::new(transport),
        Box::new(executor),
        ServerOptions::default(),
    );
    Harness {
        server,
        transport: transport_handle,
        executor: executor_handle,
    }
}

/// Wait for a condition on a status receiver with timeout.
async fn wait_for_status(
    rx: &mut watch::Receiver<StatusSnapshot>,
    timeout: Duration,
    pred: impl Fn(&StatusSnapshot) -> bool,
) -> Result<StatusSnapshot, &'static str> {
    tokio::time::timeout(timeout, async {
        loop {
            {
                let status = rx.borrow_and_update().clone();
                if pred(&status) {
                    return Ok(status);
                }
            }
            if rx.changed().await.is_err() {
                return Err("watch closed");
            }
        }
    })
    .await
    .map_err(|_| "timeout")?
}

/// Wait until `pred` holds, polling.
async fn eventually(pred: impl Fn() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn start_running(h: &Harness, port: u32) -> ServerHandle {
    let handle = h.server.spawn(port).expect("start should be accepted");
    let mut status = h.server.status_receiver();
    wait_for_status(&mut status, TIMEOUT, |s| s.state == ServerState::Running)
        .await
        .expect("server should reach RUNNING");
    handle
}

fn error_ack(message: &str) -> ServerMessage {
    ServerMessage::error(message)
}

#[tokio::test]
async fn test_preemption_and_graceful_stop() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    assert_eq!(h.server.get_status(), "Waiting for connection...");
    assert!(!h.server.is_client_connected());
    assert_eq!(h.transport.bound_port(), Some(5000));

    let sid1 = ConnectionId::new();
    let sid2 = ConnectionId::new();

    h.transport.connect(sid1).await;
    assert_eq!(h.server.get_status(), "Connected");
    assert!(h.server.is_client_connected());
    assert_eq!(h.transport.sent_to(sid1), vec![ServerMessage::welcome()]);

    h.transport
        .command(sid1, Payload::text("NEXT_SLIDE"))
        .await;
    assert_eq!(h.executor.actions(), vec![Action::Advance]);

    h.transport.connect(sid2).await;
    assert_eq!(
        h.transport.forced_disconnects(),
        vec![(sid1, CloseReason::Preempted)]
    );
    assert_eq!(h.server.current_identity(), Some(sid2));
    assert_eq!(h.transport.sent_to(sid2), vec![ServerMessage::welcome()]);

    // Late disconnect of the superseded connection.
    h.transport.disconnect(sid1).await;
    assert_eq!(h.server.current_identity(), Some(sid2));
    assert!(h.server.is_client_connected());
    assert_eq!(h.server.get_status(), "Connected");

    let started = Instant::now();
    handle.stop(Duration::from_millis(500)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));

    assert_eq!(
        h.transport.sent_to(sid2).last(),
        Some(&ServerMessage::shutdown())
    );
    assert_eq!(h.transport.close_count(), 1);
    assert_eq!(h.server.state(), ServerState::Stopped);
    assert!(!h.server.is_client_connected());
    assert_eq!(h.server.current_identity(), None);
    assert_eq!(h.server.get_status(), "Server stopped");
    assert!(h.transport.broadcasts().is_empty());
}

#[tokio::test]
async fn test_start_then_stop_without_session() {
    let h = harness();
    let handle = start_running(&h, 5001).await;
    assert!(h.server.local_addr().is_some());

    let started = Instant::now();
    handle.stop(Duration::from_secs(2)).await.unwrap();
    // No session, so no grace wait.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.server.state(), ServerState::Stopped);
    assert_eq!(h.server.local_addr(), None);
}

#[tokio::test]
async fn test_stop_twice_is_idempotent() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    h.transport.connect(ConnectionId::new()).await;

    handle.stop(Duration::ZERO).await.unwrap();
    h.server.stop(Duration::ZERO).await.unwrap();
    assert_eq!(h.server.state(), ServerState::Stopped);
    assert_eq!(h.transport.close_count(), 1);
}

#[tokio::test]
async fn test_concurrent_stops_share_one_sequence() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;

    let grace = Duration::from_millis(200);
    let (first, second) = tokio::join!(h.server.stop(grace), h.server.stop(grace));
    first.unwrap();
    second.unwrap();

    assert_eq!(h.server.state(), ServerState::Stopped);
    assert_eq!(h.transport.close_count(), 1);
    let shutdowns = h
        .transport
        .sent_to(sid)
        .into_iter()
        .filter(|m| *m == ServerMessage::shutdown())
        .count();
    assert_eq!(shutdowns, 1);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_unknown_command_gets_one_error_ack() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;

    h.transport.command(sid, Payload::text("JUMP")).await;

    assert_eq!(
        h.transport.sent_to(sid),
        vec![
            ServerMessage::welcome(),
            error_ack("Unknown command: JUMP")
        ]
    );
    assert!(h.executor.actions().is_empty());
    assert_eq!(h.server.state(), ServerState::Running);
    assert!(h.transport.broadcasts().is_empty());
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_tokens_are_case_insensitive_and_trimmed() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;

    for token in ["  next_slide ", "Back", "start_slideshow", "HOME", "end", "END_SLIDESHOW"] {
        h.transport.command(sid, Payload::text(token)).await;
    }

    assert_eq!(
        h.executor.actions(),
        vec![
            Action::Advance,
            Action::Retreat,
            Action::Begin,
            Action::JumpFirst,
            Action::JumpLast,
            Action::Terminate,
        ]
    );
    assert_eq!(h.transport.sent_to(sid), vec![ServerMessage::welcome()]);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_superseded_connection_is_unauthorized() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let old = ConnectionId::new();
    let new = ConnectionId::new();
    h.transport.connect(old).await;
    h.transport.connect(new).await;

    h.transport.command(old, Payload::text("NEXT_SLIDE")).await;

    assert!(h.executor.actions().is_empty());
    assert_eq!(
        h.transport.sent_to(old).last(),
        Some(&error_ack("Not the active controller"))
    );
    assert_eq!(h.transport.sent_to(new), vec![ServerMessage::welcome()]);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_command_racing_preemption_is_settled_once() {
    let h = harness();
    let handle = start_running(&h, 5000).await;

    for round in 0..50 {
        let old = ConnectionId::new();
        let new = ConnectionId::new();
        h.transport.connect(old).await;
        let before = h.executor.actions().len();

        let (t1, t2) = (h.transport.clone(), h.transport.clone());
        let command = tokio::spawn(async move {
            t1.command(old, Payload::text("NEXT_SLIDE")).await;
        });
        let preempt = tokio::spawn(async move { t2.connect(new).await });
        command.await.unwrap();
        preempt.await.unwrap();

        let dispatched = h.executor.actions().len() - before;
        let refused = h
            .transport
            .sent_to(old)
            .contains(&error_ack("Not the active controller"));
        assert!(
            (dispatched == 1) != refused,
            "round {round}: dispatched {dispatched}, refused {refused}"
        );
        assert_eq!(h.server.current_identity(), Some(new));
    }
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_non_text_and_empty_payloads_are_rejected() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;

    h.transport.command(sid, Payload::Number(1.0)).await;
    h.transport.command(sid, Payload::Empty).await;
    h.transport.command(sid, Payload::text("   ")).await;

    assert_eq!(
        h.transport.sent_to(sid),
        vec![
            ServerMessage::welcome(),
            error_ack("Invalid command payload: expected text, got number"),
            error_ack("Invalid command payload: expected text, got empty"),
            error_ack("Empty command"),
        ]
    );
    assert!(h.executor.actions().is_empty());
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_executor_failure_is_reported_to_sender() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;
    h.executor.fail_actions(true);

    h.transport.command(sid, Payload::text("FORWARD")).await;

    let last = h.transport.sent_to(sid).pop().unwrap();
    assert_eq!(last.event_name(), "error");
    assert!(last.message().starts_with("Failed to perform"));
    assert_eq!(h.server.state(), ServerState::Running);

    h.executor.fail_actions(false);
    h.transport.command(sid, Payload::text("FORWARD")).await;
    assert_eq!(h.executor.actions(), vec![Action::Advance]);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_pointer_only_from_current_session() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let old = ConnectionId::new();
    let new = ConnectionId::new();

    h.transport.connect(old).await;
    h.transport.pointer(old, 0.5, 0.25).await;
    assert_eq!(h.server.pointer(), Some(PointerPosition::new(0.5, 0.25).unwrap()));
    eventually(|| h.executor.pointer() == PointerPosition::new(0.5, 0.25).ok()).await;

    h.transport.connect(new).await;
    assert_eq!(h.server.pointer(), None);
    h.transport.pointer(old, 0.9, 0.9).await;
    assert_eq!(h.server.pointer(), None);

    // Out of range and non-finite coordinates are dropped.
    h.transport.pointer(new, 1.5, 0.5).await;
    h.transport.pointer(new, f64::NAN, 0.5).await;
    assert_eq!(h.server.pointer(), None);
    assert!(h.transport.sent_to(new).iter().all(|m| m.event_name() != "error"));

    h.transport.pointer(new, 0.1, 0.2).await;
    assert_eq!(h.server.pointer(), Some(PointerPosition::new(0.1, 0.2).unwrap()));
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_slow_executor_sees_latest_pointer() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;
    h.executor.slow_pointer(Duration::from_millis(100));

    for i in 1..=4 {
        h.transport.pointer(sid, f64::from(i) / 10.0, 0.5).await;
    }

    let last = PointerPosition::new(0.4, 0.5).ok();
    eventually(|| h.executor.pointer() == last).await;
    assert!(h.executor.pointer_updates() < 4);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_pointer_failures_are_swallowed() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;
    h.executor.fail_pointer(true);

    h.transport.pointer(sid, 0.3, 0.3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.transport.sent_to(sid), vec![ServerMessage::welcome()]);
    assert_eq!(h.server.state(), ServerState::Running);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_connection_during_stop_is_rejected() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;

    let server = h.server.clone();
    let stopping = tokio::spawn(async move { server.stop(Duration::from_millis(300)).await });
    let mut status = h.server.status_receiver();
    wait_for_status(&mut status, TIMEOUT, |s| s.state == ServerState::Stopping)
        .await
        .unwrap();
    assert_eq!(h.server.get_status(), "Server stopped");

    let late = ConnectionId::new();
    h.transport.connect(late).await;
    assert!(h
        .transport
        .forced_disconnects()
        .contains(&(late, CloseReason::Rejected)));
    assert_eq!(h.server.current_identity(), Some(sid));
    assert!(h.transport.sent_to(late).is_empty());

    // Commands are not dispatched once stopping.
    h.transport.command(sid, Payload::text("NEXT_SLIDE")).await;
    assert!(h.executor.actions().is_empty());

    stopping.await.unwrap().unwrap();
    handle.stop(Duration::ZERO).await.unwrap();
    assert_eq!(h.server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_stop_completes_when_notice_fails() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    h.transport.connect(ConnectionId::new()).await;
    h.transport.fail_sends(true);

    handle.stop(Duration::from_millis(50)).await.unwrap();

    assert_eq!(h.server.state(), ServerState::Stopped);
    assert_eq!(h.transport.close_count(), 1);
    assert!(!h.server.is_client_connected());
}

#[tokio::test]
async fn test_invalid_port_is_rejected() {
    let h = harness();
    for port in [0, 70_000] {
        let err = h.server.start(port).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidPort(p) if p == port));
        assert!(h.server.spawn(port).is_err());
    }
    assert_eq!(h.server.state(), ServerState::Stopped);
    assert_eq!(h.transport.bound_port(), None);
}

#[tokio::test]
async fn test_start_while_running_is_refused() {
    let h = harness();
    let handle = start_running(&h, 5000).await;

    let err = h.server.start(5001).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::InvalidState {
            operation: "start",
            state: ServerState::Running
        }
    ));
    assert_eq!(h.server.state(), ServerState::Running);
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_bind_failure_then_restart() {
    let h = harness();
    h.transport.fail_bind("address in use");

    let err = h.server.start(5000).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind(_)));
    assert_eq!(h.server.state(), ServerState::Error);
    assert!(h.server.get_status().starts_with("Failed to start server:"));
    assert!(h.server.get_status().contains("address in use"));
    assert!(h.server.last_error().is_some());

    // Stop is a no-op in ERROR.
    h.server.stop(Duration::ZERO).await.unwrap();
    assert_eq!(h.server.state(), ServerState::Error);

    h.transport.clear_bind_error();
    let handle = start_running(&h, 5000).await;
    assert_eq!(h.server.last_error(), None);
    assert_eq!(h.server.get_status(), "Waiting for connection...");
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    handle.stop(Duration::ZERO).await.unwrap();

    let handle = start_running(&h, 5002).await;
    assert_eq!(h.transport.bound_port(), Some(5002));
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;
    assert_eq!(h.server.current_identity(), Some(sid));
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_transport_crash_ends_stopped() {
    let h = harness();
    let handle = start_running(&h, 5000).await;
    let sid = ConnectionId::new();
    h.transport.connect(sid).await;

    h.transport.crash("socket died");

    let mut status = h.server.status_receiver();
    let snapshot = wait_for_status(&mut status, TIMEOUT, |s| s.state == ServerState::Stopped)
        .await
        .unwrap();
    assert!(!snapshot.client_connected);
    assert_eq!(snapshot.text, "Server stopped");
    assert_eq!(h.transport.close_count(), 1);

    let result = handle.stop(Duration::ZERO).await;
    assert!(matches!(result, Err(ServerError::Transport(_))));
}

#[tokio::test]
async fn test_stop_right_after_spawn_ends_stopped() {
    let h = harness();
    let handle = h.server.spawn(5000).unwrap();
    assert_eq!(h.server.state(), ServerState::Starting);

    h.server.stop(Duration::from_millis(500)).await.unwrap();
    assert_eq!(h.server.state(), ServerState::Stopped);
    assert_eq!(h.transport.close_count(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.server.state(), ServerState::Stopped);
    tokio::time::timeout(TIMEOUT, handle.stop(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert!(!h.transport.is_serving());
}

#[tokio::test]
async fn test_stop_during_failed_start_leaves_error() {
    let h = harness();
    h.transport.fail_bind("address in use");
    let handle = h.server.spawn(5000).unwrap();

    h.server.stop(Duration::ZERO).await.unwrap();
    assert_eq!(h.server.state(), ServerState::Error);
    assert!(matches!(
        handle.stop(Duration::ZERO).await,
        Err(ServerError::Bind(_))
    ));
}

#[tokio::test]
async fn test_blocking_start_returns_after_stop() {
    let h = harness();
    let server = h.server.clone();
    let run = tokio::spawn(async move { server.start(5000).await });

    let mut status = h.server.status_receiver();
    wait_for_status(&mut status, TIMEOUT, |s| s.state == ServerState::Running)
        .await
        .unwrap();
    h.server.stop(Duration::ZERO).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_shutdown_uses_configured_grace() {
    let transport = MockTransport::new();
    let transport_handle = transport.handle();
    let server = ControlServer::new(
        Arc::new(transport),
        Box::new(MockExecutor::new()),
        ServerOptions {
            grace_period: Duration::from_millis(150),
        },
    );
    let handle = server.spawn(5000).unwrap();
    server
        .wait_for_status(|s| s.state == ServerState::Running)
        .await;
    transport_handle.connect(ConnectionId::new()).await;

    let started = Instant::now();
    server.shutdown().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
    handle.stop(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_executor_releases_backend() {
    let h = harness();
    h.server.shutdown_executor().await.unwrap();
    assert!(h.executor.is_shutdown());
}
