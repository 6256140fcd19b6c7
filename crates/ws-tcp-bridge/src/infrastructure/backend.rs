//! TCP connection management for the backend service.
//!
//! Each client WebSocket session gets its own TCP connection to the backend
//! decoded from its destination token.  The backend sees the relay as just
//! another TCP client.
//!
//! # Byte stream vs. messages
//!
//! TCP is a *stream* protocol: a single `read()` call may return less than
//! one complete backend message, or several messages and the start of the
//! next.  [`read_backend_frames`] feeds every received chunk through the
//! session's [`FrameReassembler`] and forwards each completed message over a
//! channel to the WebSocket write task, preserving stream order.
//!
//! The read loop is generic over `AsyncRead` so the reassembly wiring can be
//! unit tested against an in-memory duplex stream instead of a live socket.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::application::framing::FrameReassembler;
use crate::application::lifecycle::{SessionLifecycle, TeardownTrigger};
use crate::domain::destination::Destination;

/// The two halves of one session's backend TCP connection.
///
/// The halves are owned separately so the read loop and the write path can
/// live in different tasks without shared ownership of the stream.
pub struct BackendConnection {
    /// Read half of the backend TCP stream.
    pub read_half: tokio::net::tcp::OwnedReadHalf,
    /// Write half of the backend TCP stream.
    pub write_half: tokio::net::tcp::OwnedWriteHalf,
}

impl BackendConnection {
    /// Opens a new TCP connection to the decoded destination.
    ///
    /// Name resolution and connection establishment both happen inside
    /// `TcpStream::connect`; the call suspends rather than blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established (refused,
    /// unreachable, DNS failure).  The caller treats this exactly like a
    /// later backend I/O error: terminal for the session, no retry.
    pub async fn connect(dest: &Destination) -> anyhow::Result<Self> {
        let stream = TcpStream::connect((dest.host.as_str(), dest.port))
            .await
            .with_context(|| format!("failed to connect to backend at {dest}"))?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            read_half,
            write_half,
        })
    }
}

// ── Streaming backend reader ──────────────────────────────────────────────────

/// Reads the backend byte stream and forwards completed messages in order.
///
/// Runs until the backend closes (EOF), a read error occurs, or the frame
/// channel's receiver is dropped (the client side is gone and nothing wants
/// the frames any more).  At EOF the residual tail, if any, is flushed as
/// one final message before the `BackendClosed` trigger is recorded.
///
/// # Parameters
///
/// - `read_half`  – Read half of the backend stream.
/// - `session_id` – Session identifier string for log messages.
/// - `tx`         – Channel sender: each completed message is sent here.
/// - `lifecycle`  – Session lifecycle; the backend-side teardown triggers
///   are recorded through it.
pub async fn read_backend_frames<R>(
    mut read_half: R,
    session_id: &str,
    tx: mpsc::Sender<Vec<u8>>,
    lifecycle: Arc<Mutex<SessionLifecycle>>,
) where
    R: AsyncRead + Unpin,
{
    // Residual-tail reassembly state, owned exclusively by this loop.
    let mut reassembler = FrameReassembler::new();
    let mut read_tmp = vec![0u8; 4096];

    loop {
        let n = match read_half.read(&mut read_tmp).await {
            Ok(0) => {
                // EOF: flush a final unterminated message so it is not lost.
                if let Some(tail) = reassembler.finish() {
                    let _ = tx.send(tail).await;
                }
                debug!("session {session_id}: backend stream closed (EOF)");
                lifecycle
                    .lock()
                    .await
                    .begin_teardown(TeardownTrigger::BackendClosed);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("session {session_id}: read from backend failed: {e}");
                lifecycle
                    .lock()
                    .await
                    .begin_teardown(TeardownTrigger::BackendError);
                return;
            }
        };

        for message in reassembler.push(&read_tmp[..n]) {
            // A closed receiver means the client side already went away; any
            // message with nowhere to go is discarded, not buffered.
            if tx.send(message).await.is_err() {
                debug!("session {session_id}: frame channel closed; exiting backend reader");
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
