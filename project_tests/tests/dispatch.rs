use bytes::Bytes;
use lib_gaugefeed::protocol::Frame;
use lib_gaugefeed::{
    CompletionReason, ConnectionState, GaugeFeedError, GaugeUpdate, SubscribeOptions, SubscriptionEvent,
    SubscriptionHandle,
};
use project_tests::{connect, fast_config, start, subscribes};

fn completions(handle: &mut SubscriptionHandle) -> Vec<CompletionReason> {
    let mut out = Vec::new();
    while let Some(event) = handle.try_next() {
        if let SubscriptionEvent::Completed(reason) = event {
            out.push(reason);
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_halts_dispatch_immediately() {
    let (client, server) = start(fast_config());
    connect(&client, &server).await;

    let mut handle = client.subscribe_path("/gauge/eq/realtime/AAPL", SubscribeOptions::default()).unwrap();
    client.status().await.unwrap();
    let (wire_id, _, _) = subscribes(&server.take_sent_frames())[0].clone();

    server.inject_frame(&Frame::SingleMessage {
        subscription_id: wire_id,
        payload: Bytes::from_static(b"first"),
    });
    client.status().await.unwrap();
    match handle.try_next() {
        Some(SubscriptionEvent::Update(update)) => {
            assert_eq!(update.payload(), &Bytes::from_static(b"first"));
            assert!(update.header().dirty);
            assert_eq!(update.header().symbol, "AAPL");
        }
        other => panic!("expected update, got {:?}", other),
    }

    client.unsubscribe(&handle).unwrap();
    server.inject_frame(&Frame::SingleMessage {
        subscription_id: wire_id,
        payload: Bytes::from_static(b"second"),
    });
    client.status().await.unwrap();
    assert!(handle.try_next().is_none());

    let receipt_id = match server.take_sent_frames().as_slice() {
        [Frame::Unsubscribe {
            subscription_id,
            receipt_id: Some(receipt_id),
        }] if *subscription_id == wire_id => *receipt_id,
        other => panic!("expected one unsubscribe, got {:?}", other),
    };

    server.inject_frame(&Frame::Receipt { receipt_id });
    client.status().await.unwrap();
    assert!(matches!(
        handle.try_next(),
        Some(SubscriptionEvent::Completed(CompletionReason::Unsubscribed))
    ));
    assert!(handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn every_subscription_completes_exactly_once() {
    let (client, server) = start(fast_config());
    connect(&client, &server).await;

    let mut leaving = client.subscribe_path("/gauge/eq/realtime/AAPL", SubscribeOptions::default()).unwrap();
    let mut staying = client.subscribe_path("/gauge/eq/realtime/MSFT", SubscribeOptions::default()).unwrap();
    client.unsubscribe(&leaving).unwrap();
    client.status().await.unwrap();

    server.drop_connection("network blip");
    client.status().await.unwrap();
    assert_eq!(completions(&mut leaving), vec![CompletionReason::ReceiptInvalidated]);
    assert!(completions(&mut staying).is_empty());

    client.unsubscribe(&leaving).unwrap();
    client.disconnect().unwrap();
    client.status().await.unwrap();
    assert!(completions(&mut leaving).is_empty());
    assert_eq!(completions(&mut staying), vec![CompletionReason::Disconnected]);

    client.disconnect().unwrap();
    client.status().await.unwrap();
    assert!(completions(&mut staying).is_empty());
}

#[tokio::test(start_paused = true)]
async fn batches_fan_out_to_their_subscriptions() {
    let (client, server) = start(fast_config());
    connect(&client, &server).await;

    let mut eq = client.subscribe_path("/gauge/eq/realtime/AAPL", SubscribeOptions::default()).unwrap();
    let mut top = client.subscribe_path("/defn/top/ib/FUT", SubscribeOptions::default()).unwrap();
    client.status().await.unwrap();
    let ids: Vec<u64> = subscribes(&server.take_sent_frames()).into_iter().map(|(id, _, _)| id).collect();

    server.inject_frame(&Frame::BatchMessages {
        messages: vec![
            (ids[1], Bytes::from_static(b"t1")),
            (ids[0], Bytes::from_static(b"e1")),
            (9_999, Bytes::from_static(b"orphan")),
            (ids[0], Bytes::from_static(b"e2")),
        ],
    });
    client.status().await.unwrap();

    let mut eq_payloads = Vec::new();
    while let Some(SubscriptionEvent::Update(update)) = eq.try_next() {
        assert!(matches!(update, GaugeUpdate::Gauge { .. }));
        eq_payloads.push((update.payload().clone(), update.header().dirty));
    }
    assert_eq!(
        eq_payloads,
        vec![(Bytes::from_static(b"e1"), true), (Bytes::from_static(b"e2"), false)]
    );

    match top.try_next() {
        Some(SubscriptionEvent::Update(GaugeUpdate::Definition { header, payload, .. })) => {
            assert_eq!(header.symbol, "ib");
            assert_eq!(payload, Bytes::from_static(b"t1"));
        }
        other => panic!("expected definition update, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn subscribe_receipts_confirm_and_errors_stay_local() {
    let (client, server) = start(fast_config());
    connect(&client, &server).await;
    server.take_sent_frames();

    let options = SubscribeOptions {
        with_receipt: true,
        throttle_rate_ms: 250,
    };
    let mut good = client.subscribe_path("/gauge/sent/realtime/AAPL", options).unwrap();
    let mut bad = client.subscribe_path("/gauge/sent/realtime/NOPE", options).unwrap();
    client.status().await.unwrap();
    let sent = server.take_sent_frames();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|f| matches!(f, Frame::Subscribe { throttle_rate_ms: 250, .. })));
    let subs = subscribes(&sent);

    server.inject_frame(&Frame::Receipt {
        receipt_id: subs[0].2.unwrap(),
    });
    server.inject_frame(&Frame::SubscriptionError {
        subscription_id: subs[1].0,
        message: "unknown symbol".into(),
    });
    let status = client.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.pending_receipts, 1);

    assert!(matches!(good.try_next(), Some(SubscriptionEvent::Confirmed)));
    assert!(good.try_next().is_none());
    match bad.try_next() {
        Some(SubscriptionEvent::Error(GaugeFeedError::Subscription { subscription_id, message })) => {
            assert_eq!(subscription_id, subs[1].0);
            assert_eq!(message, "unknown symbol");
        }
        other => panic!("expected subscription error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn throttle_change_is_sent_and_remembered() {
    let (client, server) = start(fast_config());
    connect(&client, &server).await;

    let handle = client.subscribe_path("/gauge/trend/realtime/ES", SubscribeOptions::default()).unwrap();
    client.set_throttle(&handle, 1_000).unwrap();
    client.status().await.unwrap();
    let frames = server.take_sent_frames();
    let wire_id = subscribes(&frames)[0].0;
    assert!(matches!(
        frames.last(),
        Some(Frame::Throttle { subscription_id, throttle_rate_ms: 1_000, receipt_id: Some(_) }) if *subscription_id == wire_id
    ));

    server.drop_connection("blip");
    client.status().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    project_tests::accept_and_handshake(&client, &server).await;
    assert!(matches!(
        subscribes(&server.sent_frames()).as_slice(),
        [(_, _, None)]
    ));
    assert!(server
        .sent_frames()
        .iter()
        .any(|f| matches!(f, Frame::Subscribe { throttle_rate_ms: 1_000, .. })));
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_losing_the_connection() {
    let (client, server) = start(fast_config());
    connect(&client, &server).await;
    let mut handle = client.subscribe_path("/gauge/eq/realtime/AAPL", SubscribeOptions::default()).unwrap();
    client.status().await.unwrap();
    let wire_id = subscribes(&server.take_sent_frames())[0].0;

    server.inject(vec![0xff, 0xff, 0xff]);
    server.inject_frame(&Frame::SingleMessage {
        subscription_id: wire_id,
        payload: Bytes::from_static(b"ok"),
    });
    let status = client.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(matches!(handle.try_next(), Some(SubscriptionEvent::Update(_))));
}
