//! Application layer for ws-tcp-bridge.
//!
//! The application layer holds the relay's actual invariants: how backend
//! bytes are cut into discrete messages, how client messages are terminated
//! before hitting the backend, and how a session moves through its
//! lifecycle.  It knows *what* the relay guarantees, but delegates *how*
//! bytes move to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Re-segmenting the backend byte stream at the message delimiter
//!   ([`framing::FrameReassembler`])
//! - Guaranteeing exactly one trailing delimiter on every backend write
//!   ([`framing::delimit_message`])
//! - The session lifecycle state machine and its idempotent teardown
//!   ([`lifecycle::SessionLifecycle`])
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - Tokio task spawning (that happens in the infrastructure layer)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod framing;
pub mod lifecycle;

// Re-export so callers can write `application::FrameReassembler` concisely.
pub use framing::{delimit_message, FrameReassembler, DELIMITER};
pub use lifecycle::{SessionLifecycle, SessionState, TeardownTrigger};
