//! Ingestion listener integration tests over plain TCP.
//!
//! Each test starts a listener on an ephemeral port through
//! [`ListenerHarness`] and drives it with raw sockets.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use telemetry_relay_core::envelope::{
    ContainerMetric, CounterEvent, Envelope, ErrorEvent, HttpStart, HttpStartStop, HttpStop,
    LogMessage, MessageType, Method, PeerType, Uuid, ValueMetric,
};
use telemetry_relay_core::metrics::TOTAL_RECEIVED_MESSAGE_COUNT;
use telemetry_relay_core::network::codec;
use telemetry_relay_core::testing::{ListenerHarness, WAIT_TIMEOUT};
use telemetry_relay_core::ListenerOptions;

/// One envelope of every event type.
fn mixed_envelopes() -> Vec<Envelope> {
    vec![
        Envelope::wrap(
            "origin",
            HttpStart {
                timestamp: 1,
                request_id: Some(Uuid::from_u128(1)),
                peer_type: PeerType::Client as i32,
                method: Method::Get as i32,
                uri: "/health".to_string(),
                remote_address: "10.0.0.1".to_string(),
                user_agent: "test".to_string(),
            },
        ),
        Envelope::wrap(
            "origin",
            HttpStop {
                timestamp: 2,
                uri: "/health".to_string(),
                request_id: Some(Uuid::from_u128(1)),
                status_code: 200,
                content_length: 12,
                ..Default::default()
            },
        ),
        Envelope::wrap("origin", HttpStartStop::default()),
        Envelope::wrap(
            "origin",
            LogMessage::new(MessageType::Out, "some message", "appId", "APP"),
        ),
        Envelope::wrap("origin", ValueMetric::new("latency", 12.5, "ms")),
        Envelope::wrap("origin", CounterEvent::new("requests", 3)),
        Envelope::wrap("origin", ErrorEvent::new("router", 500, "upstream failed")),
        Envelope::wrap("origin", ContainerMetric::new("app-guid", 0, 42.0, 1024, 2048)),
    ]
}

async fn send_frames(stream: &mut TcpStream, envelopes: &[Envelope]) {
    for envelope in envelopes {
        stream.write_all(&codec::encode(envelope).unwrap()).await.unwrap();
    }
    stream.flush().await.unwrap();
}

/// Bytes declaring a 1000-byte payload followed by only 12 payload bytes.
fn truncated_frame() -> BytesMut {
    let mut bytes = BytesMut::new();
    bytes.put_u32_le(1000);
    bytes.extend_from_slice(b"only 12 byte");
    assert_eq!(bytes.len(), 16);
    bytes
}

/// Envelopes from one connection arrive in send order.
#[tokio::test]
async fn test_mixed_envelopes_delivered_in_order() {
    let mut harness = ListenerHarness::plain("ingest").await;
    let envelopes = mixed_envelopes();

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    send_frames(&mut stream, &envelopes).await;

    for expected in &envelopes {
        assert_eq!(harness.recv().await.as_ref(), Some(expected));
    }

    let n = envelopes.len() as u64;
    assert_eq!(
        harness.wait_for_counter("ingest.receivedMessageCount", n).await,
        n
    );
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 0);
}

/// Two concurrent connections deliver everything, each in its own order.
#[tokio::test]
async fn test_concurrent_connections_deliver_all() {
    let mut harness = ListenerHarness::plain("ingest").await;

    let first: Vec<Envelope> = (0..20)
        .map(|i| Envelope::wrap("first", CounterEvent::new("seq", i)))
        .collect();
    let second: Vec<Envelope> = (0..30)
        .map(|i| Envelope::wrap("second", CounterEvent::new("seq", i)))
        .collect();

    let address = harness.address();
    let senders = [first.clone(), second.clone()].map(|batch| {
        let address = address.clone();
        tokio::spawn(async move {
            let mut stream = TcpStream::connect(address).await.unwrap();
            send_frames(&mut stream, &batch).await;
        })
    });
    for sender in senders {
        sender.await.unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..first.len() + second.len() {
        received.push(harness.recv().await.expect("envelope should arrive"));
    }

    let by_origin = |origin: &str| -> Vec<u64> {
        received
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.counter_event.as_ref().unwrap().delta)
            .collect()
    };
    assert_eq!(by_origin("first"), (0..20).collect::<Vec<_>>());
    assert_eq!(by_origin("second"), (0..30).collect::<Vec<_>>());
    assert_eq!(harness.wait_for_counter(TOTAL_RECEIVED_MESSAGE_COUNT, 50).await, 50);
}

/// Received byte count is the sum of payload lengths, excluding prefixes.
#[tokio::test]
async fn test_received_byte_count_matches_payloads() {
    let mut harness = ListenerHarness::plain("bytes").await;
    let envelopes = mixed_envelopes();
    let expected: u64 = envelopes.iter().map(|e| e.encoded_len() as u64).sum();

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    send_frames(&mut stream, &envelopes).await;
    for _ in &envelopes {
        harness.recv().await.unwrap();
    }

    assert_eq!(
        harness.wait_for_counter("bytes.receivedByteCount", expected).await,
        expected
    );
}

/// A declared length larger than what arrives is one error and no delivery.
#[tokio::test]
async fn test_truncated_frame_counts_one_error() {
    let mut harness = ListenerHarness::plain("ingest").await;

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    stream.write_all(&truncated_frame()).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    assert_eq!(harness.wait_for_counter("ingest.receiveErrorCount", 1).await, 1);
    harness.wait_for_idle().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 1);
    assert_eq!(harness.counter("ingest.receivedMessageCount"), 0);
    assert!(harness.try_recv().is_none());
}

/// Frames before a corrupt one are delivered; nothing after it is read.
#[tokio::test]
async fn test_garbage_payload_closes_connection() {
    let mut harness = ListenerHarness::plain("ingest").await;
    let good = Envelope::wrap("origin", CounterEvent::new("ok", 1));
    let after = Envelope::wrap("origin", CounterEvent::new("after", 2));

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    stream.write_all(&codec::encode(&good).unwrap()).await.unwrap();
    stream
        .write_all(&codec::frame_payload(&[0xff, 0xff, 0xff, 0xff]).unwrap())
        .await
        .unwrap();
    // The listener may already have closed the socket; either outcome is fine.
    let _ = stream.write_all(&codec::encode(&after).unwrap()).await;

    assert_eq!(harness.recv().await, Some(good));
    assert_eq!(harness.wait_for_counter("ingest.receiveErrorCount", 1).await, 1);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("listener should close the connection");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(harness.try_recv().is_none());
}

/// A failing connection does not disturb a healthy one.
#[tokio::test]
async fn test_failure_is_isolated_per_connection() {
    let mut harness = ListenerHarness::plain("ingest").await;

    let mut healthy = TcpStream::connect(harness.address()).await.unwrap();
    let mut broken = TcpStream::connect(harness.address()).await.unwrap();

    broken.write_all(&truncated_frame()).await.unwrap();
    drop(broken);
    assert_eq!(harness.wait_for_counter("ingest.receiveErrorCount", 1).await, 1);

    let envelope = Envelope::wrap("origin", ValueMetric::new("cpu", 0.5, "ratio"));
    send_frames(&mut healthy, std::slice::from_ref(&envelope)).await;
    assert_eq!(harness.recv().await, Some(envelope));
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 1);
}

/// Connecting and closing without sending is not an error.
#[tokio::test]
async fn test_clean_disconnect_is_not_an_error() {
    let harness = ListenerHarness::plain("ingest").await;

    let stream = TcpStream::connect(harness.address()).await.unwrap();
    drop(stream);

    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.wait_for_idle().await;
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 0);
}

/// A sender resetting the socket right after a complete frame loses nothing.
#[tokio::test]
async fn test_reset_on_frame_boundary_is_not_an_error() {
    let mut harness = ListenerHarness::plain("ingest").await;
    let envelope = Envelope::wrap("origin", ValueMetric::new("cpu", 0.75, "ratio"));

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    send_frames(&mut stream, std::slice::from_ref(&envelope)).await;
    assert_eq!(harness.recv().await, Some(envelope));

    // Zero linger turns close into an RST.
    stream.set_linger(Some(Duration::ZERO)).unwrap();
    drop(stream);

    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.wait_for_idle().await;
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 0);
    assert_eq!(harness.counter("ingest.receivedMessageCount"), 1);
}

/// A reset that cuts a frame in half is still a receive error.
#[tokio::test]
async fn test_reset_inside_frame_counts_one_error() {
    let mut harness = ListenerHarness::plain("ingest").await;
    let envelope = Envelope::wrap("origin", ValueMetric::new("cpu", 0.75, "ratio"));

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    send_frames(&mut stream, std::slice::from_ref(&envelope)).await;
    assert_eq!(harness.recv().await, Some(envelope));

    stream.write_all(&truncated_frame()).await.unwrap();
    stream.flush().await.unwrap();
    // Let the listener buffer the partial frame before the reset lands.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream.set_linger(Some(Duration::ZERO)).unwrap();
    drop(stream);

    assert_eq!(harness.wait_for_counter("ingest.receiveErrorCount", 1).await, 1);
    harness.wait_for_idle().await;
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 1);
    assert_eq!(harness.counter("ingest.receivedMessageCount"), 1);
}

/// Declared lengths above the cap are rejected without waiting for the payload.
#[tokio::test]
async fn test_oversized_frame_rejected() {
    let options = ListenerOptions {
        max_frame_size: 64,
        ..ListenerOptions::default()
    };
    let harness = ListenerHarness::start("small", None, options, 8).await;

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    stream.write_all(&1_000_000u32.to_le_bytes()).await.unwrap();

    assert_eq!(harness.wait_for_counter("small.receiveErrorCount", 1).await, 1);
}

/// An idle sender exceeding the read timeout is dropped and counted.
#[tokio::test]
async fn test_read_timeout_counts_error() {
    let options = ListenerOptions {
        read_timeout: Some(Duration::from_millis(100)),
        ..ListenerOptions::default()
    };
    let harness = ListenerHarness::start("idle", None, options, 8).await;

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    assert_eq!(harness.wait_for_counter("idle.receiveErrorCount", 1).await, 1);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT_TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

/// Stopping with live connections closes them without counting errors.
#[tokio::test]
async fn test_stop_closes_connections_without_errors() {
    let mut harness = ListenerHarness::plain("ingest").await;

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    // Half a frame, so the connection is mid-decode when stop arrives.
    stream.write_all(&[10, 0]).await.unwrap();
    let envelope = Envelope::wrap("origin", CounterEvent::new("x", 1));
    let mut other = TcpStream::connect(harness.address()).await.unwrap();
    send_frames(&mut other, std::slice::from_ref(&envelope)).await;
    assert_eq!(harness.recv().await, Some(envelope));

    harness.stop().await;

    assert_eq!(harness.listener.active_connections(), 0);
    assert_eq!(harness.counter("ingest.receiveErrorCount"), 0);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT_TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

/// A full output channel stalls only the sending connection.
#[tokio::test]
async fn test_slow_consumer_applies_backpressure() {
    let mut harness = ListenerHarness::start("bp", None, ListenerOptions::default(), 1).await;
    let envelopes: Vec<Envelope> = (0..10)
        .map(|i| Envelope::wrap("origin", CounterEvent::new("seq", i)))
        .collect();

    let mut stream = TcpStream::connect(harness.address()).await.unwrap();
    send_frames(&mut stream, &envelopes).await;

    // Only the channel's single slot can be filled until we start reading.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.counter("bp.receivedMessageCount") <= 2);

    for expected in &envelopes {
        assert_eq!(harness.recv().await.as_ref(), Some(expected));
    }
    assert_eq!(harness.wait_for_counter("bp.receivedMessageCount", 10).await, 10);
}

/// Connections beyond the limit are closed on accept.
#[tokio::test]
async fn test_connection_limit() {
    let options = ListenerOptions {
        max_connections: 1,
        ..ListenerOptions::default()
    };
    let mut harness = ListenerHarness::start("limited", None, options, 8).await;

    let mut first = TcpStream::connect(harness.address()).await.unwrap();
    let envelope = Envelope::wrap("origin", CounterEvent::new("first", 1));
    send_frames(&mut first, std::slice::from_ref(&envelope)).await;
    assert_eq!(harness.recv().await, Some(envelope.clone()));
    assert_eq!(harness.listener.active_connections(), 1);

    let mut rejected = TcpStream::connect(harness.address()).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT_TIMEOUT, rejected.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    send_frames(&mut first, std::slice::from_ref(&envelope)).await;
    assert_eq!(harness.recv().await, Some(envelope));
    assert_eq!(harness.counter("limited.receiveErrorCount"), 0);
}

/// The cross-listener total sums every listener.
#[tokio::test]
async fn test_total_received_spans_listeners() {
    let mut first = ListenerHarness::plain("a").await;
    let mut second = ListenerHarness::plain("b").await;
    let envelope = Envelope::wrap("origin", CounterEvent::new("x", 1));

    for harness in [&first, &second] {
        let mut stream = TcpStream::connect(harness.address()).await.unwrap();
        send_frames(&mut stream, std::slice::from_ref(&envelope)).await;
    }
    assert!(first.recv().await.is_some());
    assert!(second.recv().await.is_some());

    // Each harness has its own registry, so each sees its own total.
    assert_eq!(first.wait_for_counter(TOTAL_RECEIVED_MESSAGE_COUNT, 1).await, 1);
    assert_eq!(second.wait_for_counter(TOTAL_RECEIVED_MESSAGE_COUNT, 1).await, 1);
    assert_eq!(first.counter("a.receivedMessageCount"), 1);
    assert_eq!(first.counter("b.receivedMessageCount"), 0);
}
