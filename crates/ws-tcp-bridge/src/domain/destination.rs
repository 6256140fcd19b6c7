//! Destination decoding: the relay's only gate on untrusted input.
//!
//! A browser cannot open a raw TCP socket, so it tells the relay where to
//! connect by embedding the target in the WebSocket request path:
//!
//! ```text
//! ws://relay-host:8080/<token>      where <token> = base64("host:port")
//! ```
//!
//! The token uses the standard base64 alphabet (`A-Z a-z 0-9 + /`) with
//! optional `=` padding.  Decoding recovers a UTF-8 `host:port` string which
//! must split into a non-empty host and a port in `1..=65535`.
//!
//! Every decode failure maps onto one of two short close reasons, which the
//! server sends with WebSocket close code 1008 (policy violation):
//!
//! - `"bad base64"`     — the token is not valid base64, or not valid UTF-8
//! - `"need host:port"` — the decoded string is not a usable `host:port`
//!
//! No further validation (reachability, allow-lists) happens here; a decoded
//! [`Destination`] is immutable for the lifetime of its session.

use base64::alphabet;
use base64::engine::{self, DecodePaddingMode, Engine as _};
use thiserror::Error;

/// Standard-alphabet base64 engine that accepts tokens with or without
/// trailing `=` padding.  Browsers' `btoa()` pads; hand-built tokens often
/// do not, and both must decode to the same destination.
const TOKEN_ENGINE: engine::GeneralPurpose = engine::GeneralPurpose::new(
    &alphabet::STANDARD,
    engine::GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors produced while decoding a destination token.
///
/// These are business-logic failures (a malformed path from the browser),
/// not I/O errors.  I/O errors are handled by the infrastructure layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    /// The token is not valid base64 in the standard alphabet.
    #[error("token is not valid base64")]
    InvalidBase64,

    /// The token decoded to bytes that are not valid UTF-8.
    #[error("token did not decode to UTF-8 text")]
    InvalidUtf8,

    /// The decoded string has no `:` separating host and port.
    #[error("decoded token has no ':' separator")]
    MissingSeparator,

    /// The host part before the `:` is empty.
    #[error("decoded token has an empty host")]
    EmptyHost,

    /// The port part is missing, non-numeric, zero, or out of range.
    #[error("decoded token has an invalid port: {0:?}")]
    InvalidPort(String),
}

impl DestinationError {
    /// The short reason string sent in the 1008 close frame.
    ///
    /// All encoding-level failures collapse to `"bad base64"` and all
    /// structural failures to `"need host:port"` — the browser gets enough
    /// to fix its token without the relay enumerating failure modes.
    pub fn close_reason(&self) -> &'static str {
        match self {
            DestinationError::InvalidBase64 | DestinationError::InvalidUtf8 => "bad base64",
            DestinationError::MissingSeparator
            | DestinationError::EmptyHost
            | DestinationError::InvalidPort(_) => "need host:port",
        }
    }
}

// ── Destination ───────────────────────────────────────────────────────────────

/// The decoded `(host, port)` target for one session's backend connection.
///
/// Decoded exactly once when the session is created and immutable
/// thereafter.  Not persisted beyond the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Hostname or IP address of the backend service.
    pub host: String,
    /// TCP port of the backend service (never zero).
    pub port: u16,
}

impl Destination {
    /// Decodes a base64 path token into a [`Destination`].
    ///
    /// # Errors
    ///
    /// Returns a [`DestinationError`] describing the first failure
    /// encountered: bad base64, bad UTF-8, missing `:`, empty host, or an
    /// unusable port.
    pub fn from_token(token: &str) -> Result<Self, DestinationError> {
        let bytes = TOKEN_ENGINE
            .decode(token)
            .map_err(|_| DestinationError::InvalidBase64)?;
        let text = String::from_utf8(bytes).map_err(|_| DestinationError::InvalidUtf8)?;

        // Split at the LAST ':' so a host that itself contains colons
        // (e.g. a bracketed IPv6 literal) keeps its port intact.
        let (host, port_str) = text
            .rsplit_once(':')
            .ok_or(DestinationError::MissingSeparator)?;

        if host.is_empty() {
            return Err(DestinationError::EmptyHost);
        }

        let port: u16 = port_str
            .parse()
            .map_err(|_| DestinationError::InvalidPort(port_str.to_string()))?;
        if port == 0 {
            return Err(DestinationError::InvalidPort(port_str.to_string()));
        }

        Ok(Destination {
            host: host.to_string(),
            port,
        })
    }

    /// Encodes this destination back into a path token.
    ///
    /// Inverse of [`Destination::from_token`]; used by the integration tests
    /// and by clients that build relay URLs.
    pub fn to_token(&self) -> String {
        TOKEN_ENGINE.encode(format!("{}:{}", self.host, self.port))
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
