//! End-to-end integration tests for the relay over loopback TCP.
//!
//! Each test stands up the real accept loop (`serve`) on an ephemeral port,
//! a scratch TCP backend on another ephemeral port, and a real WebSocket
//! client (`tokio_tungstenite::connect_async`).  Together they exercise:
//!
//! - backend-to-client re-segmentation across arbitrary chunk cuts,
//!   including the final unterminated message at stream end;
//! - client-to-backend delimiter termination (no double-termination);
//! - the 1008 policy close with reason text for malformed tokens;
//! - teardown when the backend connection cannot be established;
//! - session independence: one failing session leaves another untouched;
//! - the health-check path answering 200 without a WebSocket upgrade.
//!
//! ```text
//! test client  ==ws==>  serve() relay  ==tcp==>  scratch backend
//! ```
//!
//! Every await that could hang on a regression is wrapped in a timeout so a
//! failure shows up as an assertion, not a stuck test run.

use std::net::SocketAddr;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use ws_tcp_bridge::domain::{Destination, RelayConfig};
use ws_tcp_bridge::infrastructure::serve;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Harness ───────────────────────────────────────────────────────────────────

/// Starts the relay on an ephemeral loopback port and returns its address.
async fn start_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = RelayConfig {
        bind_addr: addr,
        ping_interval: Duration::from_secs(15),
    };
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(async move {
        serve(listener, config, running).await.unwrap();
    });
    addr
}

/// Builds the relay URL for a loopback backend port.
fn relay_url(relay: SocketAddr, backend_port: u16) -> String {
    let dest = Destination {
        host: "127.0.0.1".to_string(),
        port: backend_port,
    };
    format!("ws://{}/{}", relay, dest.to_token())
}

/// Reads binary messages from the client socket until the relay closes it,
/// returning the payloads in arrival order.
async fn collect_binary_until_close(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, WsError>> + Unpin),
) -> Vec<Vec<u8>> {
    let mut received = Vec::new();
    loop {
        let next = timeout(TEST_TIMEOUT, ws.next()).await.unwrap();
        match next {
            Some(Ok(Message::Binary(payload))) => received.push(payload),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    received
}

// ── Backend → client direction ────────────────────────────────────────────────

#[tokio::test]
async fn test_backend_messages_are_resegmented_for_the_client() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();

    // The backend cuts its stream mid-message and never terminates the last
    // one; the client must still receive three discrete messages in order.
    // The second chunk is held back until the client has seen the first
    // frame, so the cut inside "beta" cannot coalesce away.
    let (first_frame_seen_tx, first_frame_seen_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        stream.write_all(b"alpha\nbe").await.unwrap();
        stream.flush().await.unwrap();
        first_frame_seen_rx.await.unwrap();
        stream.write_all(b"ta\ngamma").await.unwrap();
        stream.flush().await.unwrap();
        // Dropping the stream closes the backend side; "gamma" arrives as
        // the final message only because the stream ended.
    });

    let relay = start_relay().await;
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, backend_port)))
        .await
        .unwrap()
        .unwrap();

    let first = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first, Message::Binary(b"alpha".to_vec()));
    first_frame_seen_tx.send(()).unwrap();

    let rest = collect_binary_until_close(&mut ws).await;
    assert_eq!(rest, vec![b"beta".to_vec(), b"gamma".to_vec()]);
}

#[tokio::test]
async fn test_empty_backend_segments_are_dropped() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        stream.write_all(b"\n\na\n\nb\n\n").await.unwrap();
        stream.flush().await.unwrap();
    });

    let relay = start_relay().await;
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, backend_port)))
        .await
        .unwrap()
        .unwrap();

    let received = collect_binary_until_close(&mut ws).await;
    assert_eq!(received, vec![b"a".to_vec(), b"b".to_vec()]);
}

// ── Client → backend direction ────────────────────────────────────────────────

#[tokio::test]
async fn test_client_messages_reach_backend_with_exactly_one_delimiter() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();

    // The backend records exactly the bytes the relay writes to it.
    let backend_task = tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        let mut buf = vec![0u8; 10];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    });

    let relay = start_relay().await;
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, backend_port)))
        .await
        .unwrap()
        .unwrap();

    // A text message without a trailing delimiter and a binary message that
    // already carries one: both must land with exactly one '\n'.
    ws.send(Message::Text("ping".to_string())).await.unwrap();
    ws.send(Message::Binary(b"pong\n".to_vec())).await.unwrap();

    let written = timeout(TEST_TIMEOUT, backend_task).await.unwrap().unwrap();
    assert_eq!(written, b"ping\npong\n");
}

#[tokio::test]
async fn test_empty_client_message_becomes_bare_delimiter() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();

    let backend_task = tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        let mut buf = vec![0u8; 1];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    });

    let relay = start_relay().await;
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, backend_port)))
        .await
        .unwrap()
        .unwrap();

    ws.send(Message::Binary(Vec::new())).await.unwrap();

    let written = timeout(TEST_TIMEOUT, backend_task).await.unwrap().unwrap();
    assert_eq!(written, b"\n");
}

// ── Destination rejection ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_token_closes_with_policy_code_and_reason() {
    let relay = start_relay().await;

    // "not-base64" contains '-' which is outside the standard alphabet.
    let url = format!("ws://{relay}/not-base64");
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(url))
        .await
        .unwrap()
        .unwrap();

    let msg = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(u16::from(frame.code), 1008);
            assert_eq!(frame.reason, "bad base64");
        }
        other => panic!("expected a Close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_without_port_closes_with_need_host_port() {
    let relay = start_relay().await;

    // Valid base64, but the decoded text has no host:port structure.
    let token = {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        STANDARD.encode("nohostport")
    };
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(format!("ws://{relay}/{token}")))
        .await
        .unwrap()
        .unwrap();

    let msg = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason, "need host:port");
        }
        other => panic!("expected a Close frame, got {other:?}"),
    }
}

// ── Backend connect failure ───────────────────────────────────────────────────

#[tokio::test]
async fn test_backend_connect_failure_closes_the_client() {
    // Bind then drop to obtain a loopback port with nothing listening.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let relay = start_relay().await;
    let (mut ws, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, dead_port)))
        .await
        .unwrap()
        .unwrap();

    // The handshake succeeded (the token was valid); the connect failure
    // then closes the client without any relayed data.
    let next = timeout(TEST_TIMEOUT, ws.next()).await.unwrap();
    match next {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected the relay to close the client, got {other:?}"),
    }
}

// ── Session independence ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_session_does_not_disturb_an_active_one() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();

    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        stream.write_all(b"still here\n").await.unwrap();
        stream.flush().await.unwrap();
        // Keep the backend open until the test is done reading.
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let relay = start_relay().await;

    // Session A: backend is dead, the session tears down on its own.
    let (mut ws_a, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, dead_port)))
        .await
        .unwrap()
        .unwrap();
    let _ = timeout(TEST_TIMEOUT, ws_a.next()).await.unwrap();

    // Session B: must connect and relay normally regardless of A's fate.
    let (mut ws_b, _) = timeout(TEST_TIMEOUT, connect_async(relay_url(relay, backend_port)))
        .await
        .unwrap()
        .unwrap();
    let msg = timeout(TEST_TIMEOUT, ws_b.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(msg, Message::Binary(b"still here".to_vec()));
}

// ── Health surface ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_path_answers_plain_http_checker() {
    let relay = start_relay().await;

    // A plain-HTTP checker (no upgrade headers at all) gets a complete
    // 200 response with body `ok` and a clean close.
    let mut stream = tokio::net::TcpStream::connect(relay).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: relay\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(TEST_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(
        response.starts_with("HTTP/1.1 200 OK\r\n"),
        "unexpected response: {response}"
    );
    assert!(response.ends_with("\r\n\r\nok"), "unexpected body: {response}");
}

#[tokio::test]
async fn test_health_path_answers_200_without_upgrading() {
    let relay = start_relay().await;

    // A WebSocket client probing the health path gets the same plain 200
    // instead of an upgrade, surfaced as an HTTP error with the response.
    let result = timeout(TEST_TIMEOUT, connect_async(format!("ws://{relay}/healthz")))
        .await
        .unwrap();
    match result {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status().as_u16(), 200);
        }
        other => panic!("expected an HTTP 200 response, got {other:?}"),
    }
}
