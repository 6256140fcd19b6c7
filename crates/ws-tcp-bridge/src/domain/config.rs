//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It can be constructed from CLI arguments (preferred for production) or
//! from sensible defaults (useful for local development and tests).
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) means the infrastructure layer is the
//! only place that touches CLI args and the process environment.

use std::net::SocketAddr;
use std::time::Duration;

/// All runtime configuration for the relay.
///
/// Build this struct once at startup (via CLI args or defaults) and then
/// wrap it in an `Arc` so it can be shared cheaply across all session tasks.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// The address and port the WebSocket listener binds to.
    ///
    /// `0.0.0.0` accepts connections from any network interface.  Set to
    /// `127.0.0.1` to accept only local connections.
    pub bind_addr: SocketAddr,

    /// How often a WebSocket protocol-level Ping is sent to each connected
    /// client while its session is active.
    ///
    /// The ping keeps intermediaries (reverse proxies, PaaS routers) from
    /// treating an otherwise idle connection as dead.  No Pong reply is
    /// required; a missing reply does not by itself close the session.
    pub ping_interval: Duration,
}

impl Default for RelayConfig {
    /// Returns a `RelayConfig` suitable for local development without any
    /// external configuration.
    ///
    /// | Field         | Default       |
    /// |---------------|---------------|
    /// | bind_addr     | `0.0.0.0:8080`|
    /// | ping_interval | 15 seconds    |
    fn default() -> Self {
        Self {
            // These are compile-time-known valid socket address strings.
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            ping_interval: Duration::from_secs(15),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
