//! Shared fixtures for the workspace integration tests.
//!
//! Every scenario drives a real [`GaugeClient`] through the in-memory
//! transport, playing the server by hand with [`MemoryServer`].

use std::time::Duration;

use lib_gaugefeed::auth::unsigned_token;
use lib_gaugefeed::protocol::Frame;
use lib_gaugefeed::transport::{MemoryServer, MemoryTransport};
use lib_gaugefeed::{ClientConfig, ClientEvent, ConnectionState, Credential, GaugeClient, ReconnectPolicy};
use tokio::sync::broadcast;

/// Short timers so paused-clock tests stay readable.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        host: "feed.test".to_string(),
        reconnect: ReconnectPolicy {
            enabled: true,
            base_interval_ms: 100,
            max_attempts: 3,
        },
        heartbeat_check_interval_ms: 1_000,
        max_wait_ms: 3_000,
        connect_timeout_ms: 2_000,
        tick_interval_ms: 100,
        ..ClientConfig::default()
    }
}

pub fn credential() -> Credential {
    Credential::new(unsigned_token("tester", Some(4_102_444_800))).expect("fixture token is valid")
}

/// Client plus the server side of its transport.
pub fn start(config: ClientConfig) -> (GaugeClient, MemoryServer) {
    let (transport, server) = MemoryTransport::pair();
    let client = GaugeClient::with_transport(config, transport).expect("fixture config is valid");
    (client, server)
}

/// Completes a pending open and acknowledges the handshake.
pub async fn accept_and_handshake(client: &GaugeClient, server: &MemoryServer) {
    assert!(server.accept(), "no pending open to accept");
    client.status().await.expect("engine running");
    assert!(server.inject_frame(&Frame::Connected {
        session: "test".to_string()
    }));
    let status = client.status().await.expect("engine running");
    assert_eq!(status.state, ConnectionState::Connected);
}

/// Connects and completes the handshake.
pub async fn connect(client: &GaugeClient, server: &MemoryServer) {
    client.connect(credential()).expect("engine running");
    client.status().await.expect("engine running");
    accept_and_handshake(client, server).await;
}

/// `(wire id, destination, receipt id)` of every Subscribe frame, in send order.
pub fn subscribes(frames: &[Frame]) -> Vec<(u64, String, Option<u64>)> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            Frame::Subscribe {
                subscription_id,
                destination,
                receipt_id,
                ..
            } => Some((*subscription_id, destination.clone(), *receipt_id)),
            _ => None,
        })
        .collect()
}

/// Client events received so far.
pub fn drain_events(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Lets paused time run forward while the engine processes its ticks.
pub async fn run_for(client: &GaugeClient, duration: Duration) {
    tokio::time::sleep(duration).await;
    client.status().await.expect("engine running");
}
