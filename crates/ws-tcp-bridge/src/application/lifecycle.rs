//! Session lifecycle state machine.
//!
//! One [`SessionLifecycle`] exists per session.  It tracks where the session
//! is between "backend connect in flight" and "both halves released", and it
//! is the single arbiter of teardown: the client-side and backend-side close
//! and error events may fire back-to-back or concurrently, and whichever
//! reaches [`SessionLifecycle::begin_teardown`] first wins.  Every later
//! trigger is a recorded no-op, so no handler ever operates on an
//! already-released connection.
//!
//! ```text
//! Connecting ──activate()──────────────▶ Active
//!     │                                    │
//!     └──begin_teardown()──▶ Closing ◀─────┘
//!                               │
//!                  finish_teardown()
//!                               ▼
//!                            Closed
//! ```
//!
//! The state machine itself is pure — the infrastructure layer decides what
//! "close the backend" physically means.  That split keeps the idempotence
//! rules unit-testable without sockets.

use std::fmt;

// ── States and triggers ───────────────────────────────────────────────────────

/// Where a session currently is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Backend connect is in flight; the client WebSocket is open.
    Connecting,
    /// Both sides open, relay running, liveness probe active.
    Active,
    /// Teardown initiated; at least one side not yet confirmed closed.
    Closing,
    /// Terminal: probe stopped, both handles released.
    Closed,
}

/// The event that initiated teardown.
///
/// All triggers funnel into the same teardown path; they differ only in the
/// diagnostic text attached to the session's closing log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTrigger {
    /// The client sent a Close frame or its stream ended.
    ClientClosed,
    /// Reading from or writing to the client failed.
    ClientError,
    /// The backend stream reached end-of-input.
    BackendClosed,
    /// Reading from or writing to the backend failed.
    BackendError,
    /// The backend TCP connection could not be established.
    BackendConnectFailed,
}

impl fmt::Display for TeardownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TeardownTrigger::ClientClosed => "client closed",
            TeardownTrigger::ClientError => "client error",
            TeardownTrigger::BackendClosed => "backend closed",
            TeardownTrigger::BackendError => "backend error",
            TeardownTrigger::BackendConnectFailed => "backend connect failed",
        };
        f.write_str(text)
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// Per-session lifecycle state and teardown arbiter.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    trigger: Option<TeardownTrigger>,
}

impl SessionLifecycle {
    /// Creates a lifecycle in [`SessionState::Connecting`].
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            trigger: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The trigger that won the teardown race, once one has fired.
    pub fn trigger(&self) -> Option<TeardownTrigger> {
        self.trigger
    }

    /// `true` while the relay should keep moving bytes and probing.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Marks the backend connect as succeeded: `Connecting → Active`.
    ///
    /// Returns `true` if the transition happened.  A session already past
    /// `Connecting` (e.g. the client hung up during connect and teardown
    /// won the race) stays where it is and must not start relaying.
    pub fn activate(&mut self) -> bool {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Active;
            true
        } else {
            false
        }
    }

    /// Requests teardown for the given trigger.
    ///
    /// The first call from `Connecting` or `Active` records the trigger,
    /// moves to `Closing`, and returns `true` — the caller now owns the
    /// actual close sequence.  Any call after that (same trigger or the
    /// other side's, repeated or interleaved) returns `false` and changes
    /// nothing.
    pub fn begin_teardown(&mut self, trigger: TeardownTrigger) -> bool {
        match self.state {
            SessionState::Connecting | SessionState::Active => {
                self.state = SessionState::Closing;
                self.trigger = Some(trigger);
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    /// Marks both handles released: `Closing → Closed`.
    ///
    /// The liveness probe must already be stopped when this is called.
    /// Calling it again, or before any teardown began, changes nothing.
    pub fn finish_teardown(&mut self) {
        if self.state == SessionState::Closing {
            self.state = SessionState::Closed;
        }
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_connecting() {
        let lc = SessionLifecycle::new();
        assert_eq!(lc.state(), SessionState::Connecting);
        assert_eq!(lc.trigger(), None);
        assert!(!lc.is_active());
    }

    #[test]
    fn test_activate_moves_connecting_to_active() {
        let mut lc = SessionLifecycle::new();
        assert!(lc.activate());
        assert_eq!(lc.state(), SessionState::Active);
        assert!(lc.is_active());
    }

    #[test]
    fn test_teardown_from_active() {
        let mut lc = SessionLifecycle::new();
        lc.activate();
        assert!(lc.begin_teardown(TeardownTrigger::ClientClosed));
        assert_eq!(lc.state(), SessionState::Closing);
        assert_eq!(lc.trigger(), Some(TeardownTrigger::ClientClosed));
        lc.finish_teardown();
        assert_eq!(lc.state(), SessionState::Closed);
    }

    #[test]
    fn test_teardown_from_connecting_on_connect_failure() {
        let mut lc = SessionLifecycle::new();
        assert!(lc.begin_teardown(TeardownTrigger::BackendConnectFailed));
        lc.finish_teardown();
        assert_eq!(lc.state(), SessionState::Closed);
        assert_eq!(lc.trigger(), Some(TeardownTrigger::BackendConnectFailed));
    }

    #[test]
    fn test_second_trigger_is_a_no_op_client_first() {
        let mut lc = SessionLifecycle::new();
        lc.activate();
        assert!(lc.begin_teardown(TeardownTrigger::ClientClosed));
        // The backend side firing immediately after must not win.
        assert!(!lc.begin_teardown(TeardownTrigger::BackendClosed));
        assert_eq!(lc.trigger(), Some(TeardownTrigger::ClientClosed));
    }

    #[test]
    fn test_second_trigger_is_a_no_op_backend_first() {
        let mut lc = SessionLifecycle::new();
        lc.activate();
        assert!(lc.begin_teardown(TeardownTrigger::BackendError));
        assert!(!lc.begin_teardown(TeardownTrigger::ClientError));
        assert_eq!(lc.trigger(), Some(TeardownTrigger::BackendError));
    }

    #[test]
    fn test_trigger_after_closed_is_a_no_op() {
        let mut lc = SessionLifecycle::new();
        lc.activate();
        lc.begin_teardown(TeardownTrigger::BackendClosed);
        lc.finish_teardown();
        assert!(!lc.begin_teardown(TeardownTrigger::ClientClosed));
        assert_eq!(lc.state(), SessionState::Closed);
        assert_eq!(lc.trigger(), Some(TeardownTrigger::BackendClosed));
    }

    #[test]
    fn test_repeated_same_trigger_is_a_no_op() {
        let mut lc = SessionLifecycle::new();
        lc.activate();
        assert!(lc.begin_teardown(TeardownTrigger::ClientClosed));
        assert!(!lc.begin_teardown(TeardownTrigger::ClientClosed));
        assert_eq!(lc.state(), SessionState::Closing);
    }

    #[test]
    fn test_activate_after_teardown_does_not_resurrect() {
        // The client hung up while the backend connect was still in flight;
        // the late connect success must not restart the session.
        let mut lc = SessionLifecycle::new();
        lc.begin_teardown(TeardownTrigger::ClientClosed);
        assert!(!lc.activate());
        assert_eq!(lc.state(), SessionState::Closing);
    }

    #[test]
    fn test_finish_without_begin_changes_nothing() {
        let mut lc = SessionLifecycle::new();
        lc.finish_teardown();
        assert_eq!(lc.state(), SessionState::Connecting);
        lc.activate();
        lc.finish_teardown();
        assert_eq!(lc.state(), SessionState::Active);
    }

    #[test]
    fn test_repeated_finish_is_a_no_op() {
        let mut lc = SessionLifecycle::new();
        lc.activate();
        lc.begin_teardown(TeardownTrigger::ClientError);
        lc.finish_teardown();
        lc.finish_teardown();
        assert_eq!(lc.state(), SessionState::Closed);
    }

    #[test]
    fn test_exactly_one_teardown_wins_regardless_of_order() {
        for (first, second) in [
            (TeardownTrigger::ClientClosed, TeardownTrigger::BackendClosed),
            (TeardownTrigger::BackendClosed, TeardownTrigger::ClientClosed),
            (TeardownTrigger::ClientError, TeardownTrigger::BackendError),
            (TeardownTrigger::BackendError, TeardownTrigger::ClientError),
        ] {
            let mut lc = SessionLifecycle::new();
            lc.activate();
            let wins = [lc.begin_teardown(first), lc.begin_teardown(second)];
            assert_eq!(wins.iter().filter(|w| **w).count(), 1);
            assert_eq!(lc.trigger(), Some(first));
        }
    }

    #[test]
    fn test_trigger_display_text() {
        assert_eq!(TeardownTrigger::ClientClosed.to_string(), "client closed");
        assert_eq!(TeardownTrigger::BackendConnectFailed.to_string(), "backend connect failed");
    }
}
