//! Infrastructure layer for ws-tcp-bridge.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from browsers and opening TCP connections to backend services.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener for client WebSocket connections
//! - Performing the WebSocket upgrade handshake (and answering health checks)
//! - Opening and releasing backend TCP connections
//! - Moving bytes in both directions through the application-layer framing
//! - Spawning per-session Tokio tasks and driving teardown
//!
//! # What does NOT belong here?
//!
//! - Framing and lifecycle rules (that is the application layer)
//! - Destination decoding (that is the domain layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod backend;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use ws_server::{run_server, serve};
