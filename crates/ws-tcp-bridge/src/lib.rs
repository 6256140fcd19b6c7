//! ws-tcp-bridge library crate.
//!
//! A per-connection relay between browser WebSocket clients and backend
//! services that speak newline-delimited bytes over plain TCP.
//!
//! # Architecture
//!
//! ```text
//! Browser (discrete WebSocket frames)
//!         |
//! [ws-tcp-bridge]
//!   domain/           Destination token codec, RelayConfig
//!   application/      Framing (reassembly + termination), session lifecycle
//!   infrastructure/
//!     ws_server/      Accept loop, handshake, per-session wiring
//!     backend/        TCP connection to the decoded destination
//!         |
//! Backend service ('\n'-delimited bytes over TCP)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies (no I/O, no async, no frameworks).
//! - `application` is pure transformation and state logic.
//! - `infrastructure` depends on the other layers plus `tokio` and
//!   `tungstenite`.
//!
//! The relay is byte-transparent with one exception: it injects the stream
//! delimiter on client-to-backend writes and strips it on backend-to-client
//! re-segmentation.  Everything else passes through untouched.

/// Domain layer: pure business-logic types (no I/O).
pub mod domain;

/// Application layer: framing and lifecycle logic.
pub mod application;

/// Infrastructure layer: WebSocket server and backend TCP connections.
pub mod infrastructure;
