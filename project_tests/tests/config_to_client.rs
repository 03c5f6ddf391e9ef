use std::time::Duration;

use anyhow::Result;
use lib_gaugefeed::transport::MemoryTransport;
use lib_gaugefeed::{
    load_config, ConfigOverrides, GaugeClient, GaugeFeedError, StreamId, SubscribeOptions, SubscriptionPath,
};
use project_tests::{accept_and_handshake, credential, subscribes};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn file_and_overrides_drive_the_connection() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("gaugefeed.json");
    let file = json!({
        "host": "file.example",
        "port": 9443,
        "path": "/ws/v2",
        "stream": "delay",
        "reconnectBaseIntervalMs": 250,
        "heartbeatCheckIntervalMs": 5000
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&file)?)?;

    let overrides = ConfigOverrides {
        host: Some("override.example".into()),
        use_tls: Some(false),
        ..Default::default()
    };
    let config = load_config(Some(&path), overrides)?;
    assert_eq!(config.stream, StreamId::Delayed);
    assert_eq!(config.reconnect.delay(2), Duration::from_millis(500));

    let (transport, server) = MemoryTransport::pair();
    let client = GaugeClient::with_transport(config, transport)?;
    client.connect(credential())?;
    let status = client.status().await?;

    assert_eq!(status.login.as_deref(), Some("tester"));
    assert_eq!(
        server.last_url().map(|u| u.to_string()),
        Some("ws://override.example:9443/ws/v2".to_string())
    );

    accept_and_handshake(&client, &server).await;
    let _eq = client.subscribe_gauge(SubscriptionPath::Equilibrium, "IBM", SubscribeOptions::default())?;
    let _fx = client.subscribe_gauge(SubscriptionPath::Trend, "EUR.USD", SubscribeOptions::default())?;
    client.status().await?;
    let destinations: Vec<String> = subscribes(&server.sent_frames()).into_iter().map(|(_, d, _)| d).collect();
    assert_eq!(destinations, vec!["/gauge/eq/delay/IBM", "/gauge/trend/realtime/EUR.USD"]);
    Ok(())
}

#[tokio::test]
async fn invalid_settings_are_rejected_before_the_engine_starts() {
    let overrides = ConfigOverrides {
        heartbeat_check_interval_ms: Some(10_000),
        max_wait_ms: Some(5_000),
        ..Default::default()
    };
    assert!(matches!(load_config(None, overrides), Err(GaugeFeedError::Config(_))));

    let mut config = project_tests::fast_config();
    config.port = 0;
    let (transport, _server) = MemoryTransport::pair();
    assert!(matches!(
        GaugeClient::with_transport(config, transport),
        Err(GaugeFeedError::Config(_))
    ));
}
