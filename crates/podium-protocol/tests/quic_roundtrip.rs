//! Integration test: QUIC control transport on loopback.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podium_protocol::{
    CloseReason, ControlClient, ControlTransport, EventHandler, ProtocolError,
    QuicControlTransport, ServerVerification, TransportEvent,
};
use podium_types::{Payload, ServerMessage};
use tokio::sync::mpsc;

/// Forwards every event into a channel the test reads from.
struct ChannelHandler {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("handler channel closed")
}

struct Fixture {
    transport: Arc<QuicControlTransport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    serve: tokio::task::JoinHandle<Result<(), ProtocolError>>,
    addr: std::net::SocketAddr,
    fingerprint: String,
}

async fn start_transport() -> Fixture {
    let cert = podium_certgen::generate_certificate("localhost").unwrap();
    let transport = Arc::new(QuicControlTransport::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        cert.cert_pem,
        cert.key_pem,
    ));
    let addr = transport.bind(free_udp_port()).await.unwrap();

    let (tx, events) = mpsc::unbounded_channel();
    let serving = Arc::clone(&transport);
    let serve = tokio::spawn(async move { serving.serve(Arc::new(ChannelHandler { tx })).await });

    Fixture {
        transport,
        events,
        serve,
        addr,
        fingerprint: cert.fingerprint,
    }
}

#[tokio::test]
async fn events_flow_in_order_for_one_controller() {
    let mut fx = start_transport().await;

    let mut client = ControlClient::connect(
        fx.addr,
        "phone",
        ServerVerification::Fingerprint(fx.fingerprint.clone()),
    )
    .await
    .unwrap();

    let TransportEvent::Connect { id, .. } = next_event(&mut fx.events).await else {
        panic!("expected connect first");
    };

    client.send_command("NEXT_SLIDE").await.unwrap();
    client.move_pointer(0.25, 0.75).await.unwrap();

    assert_eq!(
        next_event(&mut fx.events).await,
        TransportEvent::Command {
            id,
            payload: Payload::text("NEXT_SLIDE"),
        }
    );
    assert_eq!(
        next_event(&mut fx.events).await,
        TransportEvent::PointerMove { id, x: 0.25, y: 0.75 }
    );

    fx.transport.send(id, ServerMessage::welcome()).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, Some(ServerMessage::welcome()));

    client.disconnect().await.unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        TransportEvent::Disconnect { id }
    );

    fx.transport.close();
    let served = tokio::time::timeout(Duration::from_secs(5), fx.serve)
        .await
        .unwrap()
        .unwrap();
    assert!(served.is_ok());
}

#[tokio::test]
async fn force_disconnect_reports_reason_to_controller() {
    let mut fx = start_transport().await;

    let mut client = ControlClient::connect(fx.addr, "phone", ServerVerification::SkipVerification)
        .await
        .unwrap();
    let id = next_event(&mut fx.events).await.id();
    assert_eq!(fx.transport.connection_count(), 1);

    fx.transport.force_disconnect(id, CloseReason::Preempted);
    assert_eq!(fx.transport.connection_count(), 0);

    let err = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        ProtocolError::ClosedByPeer { code, .. } => {
            assert_eq!(CloseReason::from_code(code), Some(CloseReason::Preempted));
        }
        other => panic!("expected ClosedByPeer, got {other:?}"),
    }

    // The host still learns about the disconnect through its own read loop.
    assert_eq!(
        next_event(&mut fx.events).await,
        TransportEvent::Disconnect { id }
    );

    fx.transport.close();
    let _ = tokio::time::timeout(Duration::from_secs(5), fx.serve).await;
}

#[tokio::test]
async fn wrong_fingerprint_is_refused() {
    let fx = start_transport().await;

    let result = ControlClient::connect(
        fx.addr,
        "phone",
        ServerVerification::Fingerprint("SHA256:00:11".to_string()),
    )
    .await;
    assert!(result.is_err());

    fx.transport.close();
    let _ = tokio::time::timeout(Duration::from_secs(5), fx.serve).await;
}

#[tokio::test]
async fn serve_without_bind_fails() {
    let cert = podium_certgen::generate_certificate("localhost").unwrap();
    let transport = QuicControlTransport::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        cert.cert_pem,
        cert.key_pem,
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = transport.serve(Arc::new(ChannelHandler { tx })).await;
    assert!(matches!(result, Err(ProtocolError::NotBound)));
}
