//! ws-tcp-bridge — entry point.
//!
//! This binary accepts WebSocket connections from web browsers and relays
//! them to backend services that speak newline-delimited bytes over plain
//! TCP.  Browsers cannot open raw TCP sockets, so the destination is carried
//! in the request path as base64("host:port"); the relay decodes it, dials
//! the backend, and forwards payloads in both directions while translating
//! between discrete WebSocket frames and the delimited byte stream.
//!
//! # Usage
//!
//! ```text
//! ws-tcp-bridge [OPTIONS]
//!
//! Options:
//!   --port          <PORT>  WebSocket listener port [default: 8080]
//!   --bind          <ADDR>  Bind address [default: 0.0.0.0]
//!   --ping-interval <SECS>  Liveness ping interval in seconds [default: 15]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable        | Default   | Description                   |
//! |-----------------|-----------|-------------------------------|
//! | `PORT`          | `8080`    | WebSocket listener port       |
//! | `BIND`          | `0.0.0.0` | Bind address                  |
//! | `PING_INTERVAL` | `15`      | Liveness ping interval (secs) |
//!
//! `PORT` follows the convention of container platforms that inject the
//! listening port into the environment.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ws_tcp_bridge::domain::RelayConfig;
use ws_tcp_bridge::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-TCP relay for browser clients.
///
/// Accepts WebSocket connections whose request path carries a
/// base64-encoded `host:port` destination, and relays each one to its
/// backend over plain TCP.
#[derive(Debug, Parser)]
#[command(
    name = "ws-tcp-bridge",
    about = "WebSocket-to-TCP relay for line-delimited backends",
    version
)]
struct Cli {
    /// TCP port for the WebSocket listener.
    ///
    /// Browsers connect to this port via WebSocket (ws://host:PORT/<token>).
    #[arg(long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// IP address to bind the listener to.
    ///
    /// Use `0.0.0.0` to accept connections from any network interface, or
    /// `127.0.0.1` to accept only local connections.
    #[arg(long, default_value = "0.0.0.0", env = "BIND")]
    bind: String,

    /// Liveness ping interval in seconds.
    ///
    /// A WebSocket protocol-level Ping is sent to each connected client on
    /// this period so idle connections are not dropped by intermediaries.
    #[arg(long, default_value_t = 15, env = "PING_INTERVAL")]
    ping_interval: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;

        Ok(RelayConfig {
            bind_addr,
            ping_interval: Duration::from_secs(self.ping_interval),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// Sets up logging, parses the CLI into a [`RelayConfig`], installs a
/// Ctrl+C handler that clears the shared running flag, and runs the accept
/// loop until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The log level is controlled by RUST_LOG (e.g. RUST_LOG=debug); `info`
    // is the fallback when it is absent or invalid.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_relay_config()?;

    info!(
        "ws-tcp-bridge starting on {} (ping every {:?})",
        config.bind_addr, config.ping_interval
    );

    // The accept loop polls this flag every 200 ms and exits cleanly once
    // the Ctrl+C handler clears it.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("ws-tcp-bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
