//! End-to-end session lifecycle tests against a scripted transport.
//!
//! Verifies:
//! - Handshake → connect → keep-alive happy path
//! - Handshake rejection surfaces `HandshakeFailed` and returns to disconnected
//! - Server advice (`retry` with interval, `handshake`) is honored
//! - Transport failures trigger reconnection with subscription restore
//! - A disconnect issued before the handshake completes is deferred
//!
//! The transport side of the session is a [`TransportHandle::pair`], so the
//! tests play the role of both the socket and the server.

use bayeux_link::transport::{
    FailureClass, TransportCmd, TransportEvent, TransportFailure, TransportHandle, TransportPeer,
};
use bayeux_link::{
    BayeuxClient, BayeuxLinkError, ConnectionOptions, EventHandlers, ReachabilityProbe,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Options tuned so timer-driven behavior happens within test timeouts.
fn fast_options() -> ConnectionOptions {
    ConnectionOptions::new()
        .with_retry_interval_ms(200)
        .with_reconnect_interval_ms(Some(100))
}

async fn recv_cmd(peer: &mut TransportPeer) -> TransportCmd {
    timeout(TEST_TIMEOUT, peer.cmd_rx.recv())
        .await
        .expect("timed out waiting for a transport command")
        .expect("session dropped the transport")
}

async fn expect_open(peer: &mut TransportPeer) {
    match recv_cmd(peer).await {
        TransportCmd::Open => {},
        other => panic!("expected Open, got {:?}", other),
    }
}

/// Wait for the next outbound envelope, skipping redundant Open commands.
async fn expect_send(peer: &mut TransportPeer) -> Value {
    loop {
        match recv_cmd(peer).await {
            TransportCmd::Send(text) => return serde_json::from_str(&text).unwrap(),
            TransportCmd::Open => continue,
            TransportCmd::Close => panic!("unexpected Close while waiting for a send"),
        }
    }
}

async fn expect_close(peer: &mut TransportPeer) {
    loop {
        match recv_cmd(peer).await {
            TransportCmd::Close => return,
            TransportCmd::Open => continue,
            TransportCmd::Send(text) => panic!("unexpected send while waiting for Close: {}", text),
        }
    }
}

/// Assert that no envelope goes out within `window`.
async fn expect_quiet(peer: &mut TransportPeer, window: Duration) {
    let result = timeout(window, peer.cmd_rx.recv()).await;
    match result {
        Err(_) => {}, // quiet, as expected
        Ok(Some(TransportCmd::Close)) | Ok(None) => {},
        Ok(Some(TransportCmd::Open)) => panic!("unexpected Open"),
        Ok(Some(TransportCmd::Send(text))) => panic!("unexpected send: {}", text),
    }
}

async fn send_batch(peer: &TransportPeer, batch: Value) {
    peer.event_tx
        .send(TransportEvent::Text(batch.to_string()))
        .await
        .unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn handshake_reply(client_id: &str) -> Value {
    json!([{
        "channel": "/meta/handshake",
        "successful": true,
        "clientId": client_id,
        "supportedConnectionTypes": ["websocket"]
    }])
}

/// Drive a client through open + handshake until it is connected.
async fn establish(client: &BayeuxClient, peer: &mut TransportPeer, client_id: &str) {
    client.connect().await;
    expect_open(peer).await;
    peer.event_tx.send(TransportEvent::Opened).await.unwrap();
    let handshake = expect_send(peer).await;
    assert_eq!(handshake["channel"], "/meta/handshake");
    send_batch(peer, handshake_reply(client_id)).await;
    wait_until(|| client.is_connected()).await;
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_handshake_connect_and_keepalive() {
    let (handle, mut peer) = TransportHandle::pair();
    let connected = Arc::new(AtomicU32::new(0));
    let success = Arc::new(AtomicU32::new(0));
    let c = connected.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(fast_options())
        .event_handlers(EventHandlers::new().on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .transport(handle)
        .build()
        .unwrap();

    let s = success.clone();
    client.connect_with(None, move || {
        s.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    expect_open(&mut peer).await;
    assert!(client.is_connecting() || client.is_connected());
    peer.event_tx.send(TransportEvent::Opened).await.unwrap();

    let handshake = expect_send(&mut peer).await;
    assert_eq!(handshake["channel"], "/meta/handshake");
    assert_eq!(handshake["version"], "1.0");
    assert_eq!(handshake["minimumVersion"], "1.0beta");
    assert_eq!(handshake["supportedConnectionTypes"], json!(["websocket"]));

    send_batch(&peer, handshake_reply("abc")).await;

    // One keep-alive /meta/connect goes out after the retry interval.
    let connect = expect_send(&mut peer).await;
    assert_eq!(connect["channel"], "/meta/connect");
    assert_eq!(connect["clientId"], "abc");
    assert_eq!(connect["connectionType"], "websocket");

    assert!(client.is_connected());
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(success.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handshake_rejection_returns_to_disconnected() {
    let (handle, mut peer) = TransportHandle::pair();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let f = failures.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(fast_options())
        .event_handlers(EventHandlers::new().on_failed(move |err| {
            f.lock().unwrap().push(err);
        }))
        .transport(handle)
        .build()
        .unwrap();

    client.connect().await;
    expect_open(&mut peer).await;
    peer.event_tx.send(TransportEvent::Opened).await.unwrap();
    let _handshake = expect_send(&mut peer).await;

    send_batch(
        &peer,
        json!([{"channel": "/meta/handshake", "successful": false, "error": "bad"}]),
    )
    .await;

    wait_until(|| {
        failures
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, BayeuxLinkError::HandshakeFailed(msg) if msg == "bad"))
    })
    .await;
    wait_until(|| !client.is_connected() && !client.is_connecting()).await;

    // The rejected session closes its socket and issues nothing further.
    expect_close(&mut peer).await;
    expect_quiet(&mut peer, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn advice_retry_overrides_keepalive_interval() {
    let (handle, mut peer) = TransportHandle::pair();
    let advised = Arc::new(Mutex::new(None));
    let a = advised.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        // A long interval, so a keep-alive within the test window proves the
        // advice took effect.
        .options(
            ConnectionOptions::new()
                .with_retry_interval_ms(60_000)
                .with_reconnect_interval_ms(Some(100)),
        )
        .event_handlers(EventHandlers::new().on_advised_to_retry(move |interval| {
            *a.lock().unwrap() = Some(interval);
            interval
        }))
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    send_batch(
        &peer,
        json!([{
            "channel": "/meta/connect",
            "successful": false,
            "advice": {"reconnect": "retry", "interval": 150}
        }]),
    )
    .await;

    let connect = expect_send(&mut peer).await;
    assert_eq!(connect["channel"], "/meta/connect");
    assert_eq!(connect["clientId"], "abc");
    assert_eq!(*advised.lock().unwrap(), Some(Duration::from_millis(150)));
    assert!(client.is_connected());
}

#[tokio::test]
async fn advice_handshake_renegotiates_the_session() {
    let (handle, mut peer) = TransportHandle::pair();
    let asked = Arc::new(AtomicU32::new(0));
    let a = asked.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(fast_options())
        .event_handlers(EventHandlers::new().on_advised_to_handshake(move || {
            a.fetch_add(1, Ordering::SeqCst);
            true
        }))
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    send_batch(
        &peer,
        json!([{
            "channel": "/meta/connect",
            "successful": false,
            "advice": {"reconnect": "handshake"}
        }]),
    )
    .await;

    // A fresh handshake goes out over the open socket; a keep-alive for the
    // old identity may interleave ahead of it.
    let handshake = loop {
        let msg = expect_send(&mut peer).await;
        if msg["channel"] == "/meta/handshake" {
            break msg;
        }
        assert_eq!(msg["channel"], "/meta/connect");
    };
    assert_eq!(handshake["channel"], "/meta/handshake");
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert!(!client.is_connected());

    send_batch(&peer, handshake_reply("xyz")).await;
    wait_until(|| client.is_connected()).await;

    // The next keep-alive carries the new identity.
    let connect = expect_send(&mut peer).await;
    assert_eq!(connect["channel"], "/meta/connect");
    assert_eq!(connect["clientId"], "xyz");
}

#[tokio::test]
async fn transport_reset_reconnects_and_restores_subscriptions() {
    let (handle, mut peer) = TransportHandle::pair();
    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        // Keep-alives out of the way; reconnect after 100 ms.
        .options(
            ConnectionOptions::new()
                .with_retry_interval_ms(60_000)
                .with_reconnect_interval_ms(Some(100)),
        )
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    client.subscribe("/chat/room1", |_, _| {}, None).await;
    let subscribe = expect_send(&mut peer).await;
    assert_eq!(subscribe["channel"], "/meta/subscribe");
    assert_eq!(subscribe["subscription"], "/chat/room1");

    // Connection reset at the transport level.
    peer.event_tx
        .send(TransportEvent::Failed(TransportFailure::new(
            "connection reset by peer",
            FailureClass::ConnectionLost,
        )))
        .await
        .unwrap();
    peer.event_tx
        .send(TransportEvent::Closed {
            code: None,
            reason: "connection reset by peer".to_string(),
            was_clean: false,
        })
        .await
        .unwrap();

    // After ~100 ms the session reconnects.
    expect_open(&mut peer).await;
    assert!(client.is_reconnecting());
    peer.event_tx.send(TransportEvent::Opened).await.unwrap();
    let handshake = expect_send(&mut peer).await;
    assert_eq!(handshake["channel"], "/meta/handshake");
    send_batch(&peer, handshake_reply("def")).await;

    // The preserved subscription is re-issued with the new identity.
    let resubscribe = expect_send(&mut peer).await;
    assert_eq!(resubscribe["channel"], "/meta/subscribe");
    assert_eq!(resubscribe["subscription"], "/chat/room1");
    assert_eq!(resubscribe["clientId"], "def");

    wait_until(|| !client.is_reconnecting()).await;
    assert_eq!(client.subscribed_channels().await, vec!["/chat/room1".to_string()]);
}

/// A probe that reports the host reachable immediately.
struct InstantProbe;

impl ReachabilityProbe for InstantProbe {
    fn watch(&self, _host: String, _port: u16, notify: tokio::sync::oneshot::Sender<()>) {
        let _ = notify.send(());
    }
}

#[tokio::test]
async fn network_unreachable_waits_for_reachability_then_reconnects() {
    let (handle, mut peer) = TransportHandle::pair();
    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(
            ConnectionOptions::new()
                .with_retry_interval_ms(60_000)
                .with_reconnect_interval_ms(Some(100)),
        )
        .reachability(Arc::new(InstantProbe))
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    peer.event_tx
        .send(TransportEvent::Failed(TransportFailure::new(
            "network is unreachable",
            FailureClass::NetworkUnreachable,
        )))
        .await
        .unwrap();
    peer.event_tx
        .send(TransportEvent::Closed {
            code: None,
            reason: "network is unreachable".to_string(),
            was_clean: false,
        })
        .await
        .unwrap();

    // The probe fires at once, so the session reconnects as soon as the
    // reachability notification lands.
    expect_open(&mut peer).await;
    peer.event_tx.send(TransportEvent::Opened).await.unwrap();
    let handshake = expect_send(&mut peer).await;
    assert_eq!(handshake["channel"], "/meta/handshake");
    send_batch(&peer, handshake_reply("ghi")).await;
    wait_until(|| client.is_connected()).await;
}

#[tokio::test]
async fn disconnect_before_handshake_ack_is_deferred() {
    let (handle, mut peer) = TransportHandle::pair();
    let disconnected = Arc::new(AtomicU32::new(0));
    let d = disconnected.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(fast_options())
        .event_handlers(EventHandlers::new().on_disconnected(move |message, error| {
            assert!(message.is_some());
            assert!(error.is_none());
            d.fetch_add(1, Ordering::SeqCst);
        }))
        .transport(handle)
        .build()
        .unwrap();

    client.connect().await;
    client.disconnect().await;

    expect_open(&mut peer).await;
    peer.event_tx.send(TransportEvent::Opened).await.unwrap();
    let handshake = expect_send(&mut peer).await;
    assert_eq!(handshake["channel"], "/meta/handshake");
    send_batch(&peer, handshake_reply("abc")).await;

    // The deferred disconnect goes out with the fresh clientId.
    let disconnect = expect_send(&mut peer).await;
    assert_eq!(disconnect["channel"], "/meta/disconnect");
    assert_eq!(disconnect["clientId"], "abc");

    send_batch(&peer, json!([{"channel": "/meta/disconnect", "successful": true}])).await;
    expect_close(&mut peer).await;
    wait_until(|| disconnected.load(Ordering::SeqCst) == 1).await;
    assert!(!client.is_connected());

    // No further outbound envelopes until a new connect.
    client.publish(json!({"text": "late"}), "/chat/room1", None).await;
    expect_quiet(&mut peer, Duration::from_millis(300)).await;
}

// ── Additional coverage ─────────────────────────────────────────────────────

#[tokio::test]
async fn unsubscribe_all_clears_entries_on_acknowledgement() {
    let (handle, mut peer) = TransportHandle::pair();
    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(
            ConnectionOptions::new()
                .with_retry_interval_ms(60_000)
                .with_reconnect_interval_ms(Some(100)),
        )
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    client.subscribe("/news", |_, _| {}, None).await;
    let _subscribe = expect_send(&mut peer).await;

    client.unsubscribe_all().await;
    let unsubscribe = expect_send(&mut peer).await;
    assert_eq!(unsubscribe["channel"], "/meta/unsubscribe");
    assert_eq!(unsubscribe["subscription"], "/news");

    // Local entries survive until the acknowledgement arrives.
    assert_eq!(client.subscribed_channels().await, vec!["/news".to_string()]);

    send_batch(
        &peer,
        json!([{
            "channel": "/meta/unsubscribe",
            "successful": true,
            "subscription": "/news"
        }]),
    )
    .await;
    let mut channels = client.subscribed_channels().await;
    for _ in 0..50 {
        if channels.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        channels = client.subscribed_channels().await;
    }
    assert!(channels.is_empty());
}

#[tokio::test]
async fn published_messages_reach_subscription_callbacks() {
    let (handle, mut peer) = TransportHandle::pair();
    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(
            ConnectionOptions::new()
                .with_retry_interval_ms(60_000)
                .with_reconnect_interval_ms(Some(100)),
        )
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    client
        .subscribe("/chat/room1", move |channel, data| {
            r.lock().unwrap().push((channel.to_string(), data.clone()));
        }, None)
        .await;
    let _subscribe = expect_send(&mut peer).await;

    send_batch(
        &peer,
        json!([{
            "channel": "/chat/room1",
            "data": {"text": "hello"},
            "clientId": "someone-else"
        }]),
    )
    .await;

    wait_until(|| !received.lock().unwrap().is_empty()).await;
    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "/chat/room1");
    assert_eq!(events[0].1["text"], "hello");
}

#[tokio::test]
async fn non_array_payload_is_malformed() {
    let (handle, mut peer) = TransportHandle::pair();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let f = failures.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(fast_options())
        .event_handlers(EventHandlers::new().on_failed(move |err| {
            f.lock().unwrap().push(err);
        }))
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    send_batch(&peer, json!({"channel": "/meta/connect", "successful": true})).await;

    wait_until(|| {
        failures
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, BayeuxLinkError::MalformedJsonData(_)))
    })
    .await;
}

#[tokio::test]
async fn unexpected_messages_are_surfaced() {
    let (handle, mut peer) = TransportHandle::pair();
    let unexpected = Arc::new(Mutex::new(Vec::new()));
    let u = unexpected.clone();

    let client = BayeuxClient::builder()
        .url("wss://example.com/bayeux")
        .options(fast_options())
        .event_handlers(EventHandlers::new().on_unexpected_message(move |msg| {
            u.lock().unwrap().push(msg.channel.clone());
        }))
        .transport(handle)
        .build()
        .unwrap();

    establish(&client, &mut peer, "abc").await;

    send_batch(
        &peer,
        json!([{"channel": "/not/subscribed", "data": {"n": 1}}]),
    )
    .await;

    wait_until(|| !unexpected.lock().unwrap().is_empty()).await;
    assert_eq!(unexpected.lock().unwrap()[0], "/not/subscribed");
}
