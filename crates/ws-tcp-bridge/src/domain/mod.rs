//! Domain layer for ws-tcp-bridge.
//!
//! The domain layer contains pure business-logic types that have no
//! dependencies on I/O, networking, or async runtimes.  This makes them easy
//! to test in isolation and portable to any runtime.
//!
//! # What belongs in the domain layer?
//!
//! - The [`Destination`] type and its token codec (the only untrusted-input
//!   gate in the relay)
//! - Configuration structures
//! - Error types that describe business-logic failures
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading

// Declare the sub-modules that make up the domain layer.
pub mod config;
pub mod destination;

// Re-export the most commonly needed types at the domain module boundary
// so callers can write `domain::Destination` instead of the longer path.
pub use config::RelayConfig;
pub use destination::{Destination, DestinationError};
