//! WebSocket server: accept loop and per-session relay wiring.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Answering `/healthz` health checks with a plain HTTP 200.
//! 4. Upgrading each other connection to a WebSocket session, capturing the
//!    request path (which carries the destination token).
//! 5. Decoding the destination and opening the backend TCP connection.
//! 6. Running the per-session tasks:
//!    - **Backend reader**: re-segments the backend byte stream into
//!      messages (see `infrastructure::backend`).
//!    - **Backend → client**: delivers each completed message as one binary
//!      WebSocket frame.
//!    - **Client → backend**: normalises each WebSocket message to bytes and
//!      writes it delimiter-terminated to the backend.
//!    - **Liveness probe**: sends a WebSocket Ping on a fixed period.
//! 7. Tearing both sides down as soon as either side closes or errors, with
//!    the `SessionLifecycle` arbitrating duplicate triggers.
//! 8. Exiting the accept loop when the shared `running` flag is cleared.
//!
//! # Scalability
//!
//! Each session runs in its own Tokio task; the accept loop never blocks on
//! a session.  A failed or slow backend connect for one session cannot
//! delay the accept or relay of any other.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::framing::delimit_message;
use crate::application::lifecycle::{SessionLifecycle, TeardownTrigger};
use crate::domain::config::RelayConfig;
use crate::domain::destination::Destination;
use crate::infrastructure::backend::{read_backend_frames, BackendConnection};

/// Request path answered with a plain `200 OK` instead of a WebSocket
/// upgrade, for platform health checks.
pub const HEALTH_PATH: &str = "/healthz";

/// Request-line prefix that identifies a health check on the raw stream.
/// The trailing space keeps longer paths like `/healthzzz` from matching.
const HEALTH_REQUEST_PREFIX: &[u8] = b"GET /healthz ";

/// Literal response for a health check.  No WebSocket upgrade is involved,
/// so plain-HTTP checkers (curl, load balancers) get a well-formed answer.
const HEALTH_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
    content-type: text/plain\r\n\
    content-length: 2\r\n\
    connection: close\r\n\
    \r\n\
    ok";

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the listener and runs the accept loop until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;

    info!("relay listening on {}", config.bind_addr);
    serve(listener, config, running).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Split out from [`run_server`] so tests can bind port 0 themselves and
/// learn the ephemeral address before serving starts.
pub async fn serve(
    listener: TcpListener,
    config: RelayConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    // Shared cheaply across all session tasks.
    let config = Arc::new(config);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout on accept() lets the loop poll the shutdown flag
        // even when no clients are connecting.
        let accept_result = timeout(Duration::from_millis(200), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new client connection from {peer_addr}");
                let cfg = Arc::clone(&config);

                // One task per session; the accept loop is never delayed by
                // session I/O.
                tokio::spawn(async move {
                    handle_client_session(stream, peer_addr, cfg).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., file descriptor exhaustion).
                // Log it and keep accepting rather than taking the relay down.
                error!("accept error: {e}");
            }
            Err(_) => {
                // Timeout: no new connection in the last 200 ms.
            }
        }
    }

    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Top-level handler for a single client session.
///
/// Wraps [`run_session`] and logs the outcome.  The outer/inner split lets
/// `run_session` use `?` for error propagation while every exit is logged
/// here with the session's identifier.
async fn handle_client_session(raw_stream: TcpStream, peer_addr: SocketAddr, config: Arc<RelayConfig>) {
    let session_id = Uuid::new_v4();
    match run_session(raw_stream, peer_addr, session_id, config).await {
        Ok(()) => debug!("session {session_id} ({peer_addr}) finished"),
        Err(e) => warn!("session {session_id} ({peer_addr}) ended with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one relay session.
///
/// 1. Answers health-check requests with a plain 200 on the raw stream.
/// 2. Completes the WebSocket upgrade, capturing the request path.
/// 3. Decodes the destination token; rejects with close code 1008 on failure.
/// 4. Opens the backend TCP connection; a failure closes the client.
/// 5. Wires the relay tasks and the liveness probe.
/// 6. Waits for the first task to finish, then tears both sides down.
///
/// # Errors
///
/// Returns an error only for handshake failures; every relay-phase fault is
/// absorbed into the session's own teardown.
async fn run_session(
    mut raw_stream: TcpStream,
    peer_addr: SocketAddr,
    session_id: Uuid,
    config: Arc<RelayConfig>,
) -> anyhow::Result<()> {
    // ── Step 1: health check, answered before any WebSocket upgrade ───────────
    //
    // tungstenite refuses to write a success-status response from its
    // handshake callback, so a health request must be answered on the raw
    // stream.  Peeking leaves the bytes in place for the real handshake
    // when the request is not a health check.
    if serve_health_if_probe(&mut raw_stream)
        .await
        .with_context(|| format!("health check handling failed for {peer_addr}"))?
    {
        debug!("served health check for {peer_addr}");
        return Ok(());
    }

    // ── Step 2: WebSocket handshake, capturing the request path ───────────────
    //
    // The handshake callback runs while the HTTP upgrade request is in hand;
    // it is the only moment the request path is visible, so the path is
    // copied out here.
    let mut request_path = None;
    let callback = |req: &Request, response: Response| {
        request_path = Some(req.uri().path().to_string());
        Ok(response)
    };

    let mut ws_stream = accept_hdr_async(raw_stream, callback)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    // ── Step 3: decode the destination token ──────────────────────────────────
    //
    // This is the sole gate on untrusted input: a bad token means the
    // session is never created and the backend is never dialled.
    let path = request_path.unwrap_or_default();
    let dest = match Destination::from_token(path_token(&path)) {
        Ok(dest) => dest,
        Err(e) => {
            warn!("session {session_id} ({peer_addr}): rejected destination token: {e}");
            let close = WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: e.close_reason().into(),
            }));
            let _ = ws_stream.send(close).await;
            return Ok(());
        }
    };

    // ── Step 4: connect to the backend ────────────────────────────────────────
    let lifecycle = Arc::new(Mutex::new(SessionLifecycle::new()));

    info!("session {session_id} ({peer_addr}): connecting to backend {dest}");
    let backend = match BackendConnection::connect(&dest).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("session {session_id}: backend connect to {dest} failed: {e:#}");
            {
                let mut lc = lifecycle.lock().await;
                lc.begin_teardown(TeardownTrigger::BackendConnectFailed);
                lc.finish_teardown();
            }
            let _ = ws_stream.send(WsMessage::Close(None)).await;
            return Ok(());
        }
    };
    lifecycle.lock().await.activate();
    info!("session {session_id}: relay active ({peer_addr} to {dest})");

    // ── Step 5: split the streams and wire the relay tasks ────────────────────
    //
    // The WebSocket sink is shared between the backend-to-client forwarder
    // and the liveness probe, so it lives behind an async Mutex.  Lock
    // discipline: no task holds the sink lock and the lifecycle lock at the
    // same time.
    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(Mutex::new(ws_tx));

    let BackendConnection {
        read_half: backend_read,
        write_half: backend_write,
    } = backend;
    let backend_write = Arc::new(Mutex::new(backend_write));

    // Backend messages flow through a channel so the reassembly loop and the
    // WebSocket writes stay decoupled; the channel preserves order.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(128);

    // ── Task A: backend reader (re-segmentation) ──────────────────────────────
    let lifecycle_reader = Arc::clone(&lifecycle);
    let sid_reader = session_id.to_string();
    let backend_reader_task = tokio::spawn(async move {
        read_backend_frames(backend_read, &sid_reader, frame_tx, lifecycle_reader).await;
    });

    // ── Task B: backend → client forwarder ────────────────────────────────────
    //
    // Each completed backend message becomes exactly one binary WebSocket
    // frame, in stream order.  Ends when the channel closes (backend reader
    // done) or a send to the client fails.
    let ws_tx_b2c = Arc::clone(&ws_tx);
    let lifecycle_b2c = Arc::clone(&lifecycle);
    let sid_b2c = session_id;
    let mut backend_to_client_task = tokio::spawn(async move {
        while let Some(message) = frame_rx.recv().await {
            let send_result = {
                let mut sink = ws_tx_b2c.lock().await;
                sink.send(WsMessage::Binary(message)).await
            };
            if send_result.is_err() {
                debug!("session {sid_b2c}: WebSocket send failed (client disconnected)");
                lifecycle_b2c
                    .lock()
                    .await
                    .begin_teardown(TeardownTrigger::ClientError);
                break;
            }
        }
    });

    // ── Task C: client → backend forwarder ────────────────────────────────────
    //
    // Text and binary frames are both normalised to bytes; each one is
    // written delimiter-terminated as a single write.
    let lifecycle_c2b = Arc::clone(&lifecycle);
    let backend_write_c2b = Arc::clone(&backend_write);
    let sid_c2b = session_id;
    let mut client_to_backend_task = tokio::spawn(async move {
        loop {
            let ws_msg = match ws_rx.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                    debug!("session {sid_c2b}: client WebSocket closed");
                    lifecycle_c2b
                        .lock()
                        .await
                        .begin_teardown(TeardownTrigger::ClientClosed);
                    break;
                }
                Some(Err(e)) => {
                    warn!("session {sid_c2b}: client WebSocket error: {e}");
                    lifecycle_c2b
                        .lock()
                        .await
                        .begin_teardown(TeardownTrigger::ClientError);
                    break;
                }
                None => {
                    debug!("session {sid_c2b}: client stream ended");
                    lifecycle_c2b
                        .lock()
                        .await
                        .begin_teardown(TeardownTrigger::ClientClosed);
                    break;
                }
            };

            let payload = match ws_msg {
                WsMessage::Text(text) => text.into_bytes(),
                WsMessage::Binary(bytes) => bytes,
                WsMessage::Ping(_) | WsMessage::Pong(_) => {
                    // Protocol-level liveness traffic; tungstenite answers
                    // pings on the next sink flush.  Not relayed.
                    continue;
                }
                WsMessage::Close(_) => {
                    debug!("session {sid_c2b}: client sent Close frame");
                    lifecycle_c2b
                        .lock()
                        .await
                        .begin_teardown(TeardownTrigger::ClientClosed);
                    break;
                }
                WsMessage::Frame(_) => continue,
            };

            let write_result = {
                let mut write = backend_write_c2b.lock().await;
                write.write_all(&delimit_message(&payload)).await
            };
            if let Err(e) = write_result {
                warn!("session {sid_c2b}: write to backend failed: {e}");
                lifecycle_c2b
                    .lock()
                    .await
                    .begin_teardown(TeardownTrigger::BackendError);
                break;
            }
        }
    });

    // ── Task D: liveness probe ────────────────────────────────────────────────
    //
    // A WebSocket Ping on a fixed period keeps intermediaries from dropping
    // an idle connection.  No Pong is required; only a failed ping write is
    // treated as a client error.
    let ws_tx_ping = Arc::clone(&ws_tx);
    let lifecycle_ping = Arc::clone(&lifecycle);
    let sid_ping = session_id;
    let ping_interval = config.ping_interval;
    let mut probe_task = tokio::spawn(async move {
        let mut ticker = interval(ping_interval);
        ticker.tick().await; // The first tick resolves immediately; skip it.

        loop {
            ticker.tick().await;
            if !lifecycle_ping.lock().await.is_active() {
                break;
            }
            let send_result = {
                let mut sink = ws_tx_ping.lock().await;
                sink.send(WsMessage::Ping(Vec::new())).await
            };
            match send_result {
                Ok(()) => debug!("session {sid_ping}: sent liveness ping"),
                Err(e) => {
                    debug!("session {sid_ping}: liveness ping failed: {e}");
                    lifecycle_ping
                        .lock()
                        .await
                        .begin_teardown(TeardownTrigger::ClientError);
                    break;
                }
            }
        }
    });

    // ── Step 6: wait for the first task to finish, then tear down ─────────────
    //
    // Whichever task finished first already recorded its trigger through
    // `begin_teardown`; any trigger the other side records afterwards is a
    // no-op.  The teardown below runs exactly once per session.
    //
    // The backend reader is deliberately absent here: when the backend
    // closes, the reader exits first but queued frames (including the
    // flushed tail) are still in the channel.  The forwarder drains the
    // channel to the client and only then completes, so selecting on the
    // forwarder guarantees every completed message is delivered before the
    // session closes.
    tokio::select! {
        _ = &mut backend_to_client_task => {}
        _ = &mut client_to_backend_task => {}
        _ = &mut probe_task => {}
    }

    // The probe stops before any handle is released, so no ping can fire
    // against a closed session.
    probe_task.abort();
    backend_reader_task.abort();
    backend_to_client_task.abort();
    client_to_backend_task.abort();

    // Close the client side if it is still open, then release the backend
    // write half.  Both operations tolerate an already-gone peer.
    {
        let mut sink = ws_tx.lock().await;
        let _ = sink.send(WsMessage::Close(None)).await;
    }
    {
        let mut write = backend_write.lock().await;
        let _ = write.shutdown().await;
    }

    let cause = {
        let mut lc = lifecycle.lock().await;
        lc.finish_teardown();
        lc.trigger()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "relay task ended".to_string())
    };
    info!("session {session_id}: closed ({cause})");

    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Answers a health-check request directly on the raw TCP stream.
///
/// Peeks at the request line without consuming it; if it names
/// [`HEALTH_PATH`], the request is drained, a literal `200 OK` with body
/// `ok` is written, and `Ok(true)` is returned.  Any other request leaves
/// the stream untouched for the WebSocket handshake and returns
/// `Ok(false)`.
///
/// A health request whose first bytes have not all arrived by the time of
/// the peek falls through to the handshake, where it fails the upgrade;
/// checkers send the request line in one segment in practice.
async fn serve_health_if_probe(stream: &mut TcpStream) -> std::io::Result<bool> {
    let mut head = [0u8; HEALTH_REQUEST_PREFIX.len()];
    let n = stream.peek(&mut head).await?;
    if &head[..n] != HEALTH_REQUEST_PREFIX {
        return Ok(false);
    }

    // Consume the request through the end of its headers so the close is
    // clean (closing with unread data can reset the connection before the
    // checker has read the response).  A GET carries no body.
    let mut request = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);
        if request.len() > 8192 {
            break;
        }
    }

    stream.write_all(HEALTH_RESPONSE).await?;
    stream.shutdown().await?;
    Ok(true)
}

/// Extracts the destination token from a request path.
///
/// The token is the path with its leading slashes removed; the empty path
/// yields an empty token, which the decoder then rejects.
fn path_token(path: &str) -> &str {
    path.trim_start_matches('/')
}

// ── Tests ─────────────────────────────────────────────────────────────────────
