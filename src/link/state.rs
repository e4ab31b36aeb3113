//! Connection state and reconnect policy.
//!
//! [`ReconnectMachine`] owns the [`LinkState`] and decides which events a
//! transition raises. It does no I/O, so the retry policy can be exercised
//! without a device.
//!
//! # Transitions
//!
//! | Transition | From | To | Raises |
//! |------------|------|----|--------|
//! | `begin_connect` | any | `Connecting` | nothing |
//! | `connected` | `Connecting` | `Connected` | `connect` |
//! | `connect_failed` | `Connecting` | `Disconnected` | `connect_err` if reportable |
//! | `transport_lost` | `Connected` | `Disconnected` | `disconnect` |
//! | `disconnected` | any | `Disconnected` | nothing |
//!
//! A failure is reportable when the caller asks for it, or when it is the
//! first failure after a live session was lost.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::events::LinkEvent;

// ============================================================================
// Constants
// ============================================================================

/// Pump delay after an iteration that did not fail.
const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(1);

/// Pump delay after a failed read or reconnect.
const DEFAULT_ERROR_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// LinkState
// ============================================================================

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No transport.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is open.
    Connected,
}

impl LinkState {
    /// Returns the lowercase name of this state.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ReconnectMachine
// ============================================================================

/// Link state plus the bookkeeping for `connect_err` visibility.
#[derive(Debug, Clone, Default)]
pub struct ReconnectMachine {
    state: LinkState,
    /// A live session was lost and no failure has been reported since.
    lost_session: bool,
}

impl ReconnectMachine {
    /// Creates a machine in [`LinkState::Disconnected`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Returns `true` iff the state is [`LinkState::Connected`].
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected)
    }

    /// A connection attempt starts.
    pub fn begin_connect(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// The attempt succeeded.
    pub fn connected(&mut self) -> LinkEvent {
        self.state = LinkState::Connected;
        self.lost_session = false;
        LinkEvent::Connect
    }

    /// The attempt failed.
    ///
    /// Returns `connect_err` if `report` is set or a lost session has not
    /// been reported yet.
    pub fn connect_failed(
        &mut self,
        report: bool,
        message: impl Into<String>,
    ) -> Option<LinkEvent> {
        self.state = LinkState::Disconnected;
        let reportable = report || self.lost_session;
        self.lost_session = false;

        reportable.then(|| LinkEvent::ConnectErr {
            message: message.into(),
        })
    }

    /// The transport failed underneath the link.
    ///
    /// Returns `disconnect` only if a live session was lost.
    pub fn transport_lost(&mut self, reason: impl Into<String>) -> Option<LinkEvent> {
        if !self.is_connected() {
            return None;
        }

        self.state = LinkState::Disconnected;
        self.lost_session = true;
        Some(LinkEvent::Disconnect {
            reason: reason.into(),
        })
    }

    /// The caller disconnected on purpose.
    pub fn disconnected(&mut self) {
        self.state = LinkState::Disconnected;
        self.lost_session = false;
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Result of one pump iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Bytes arrived and were processed.
    Data,
    /// The read timed out with nothing to do.
    Idle,
    /// The read or the reconnect failed.
    Failed,
}

/// Delays between pump iterations.
///
/// Fixed, no growth: a short yield normally, a longer one after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after [`PumpOutcome::Data`] and [`PumpOutcome::Idle`].
    pub idle: Duration,
    /// Delay after [`PumpOutcome::Failed`].
    pub error: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            idle: DEFAULT_IDLE_DELAY,
            error: DEFAULT_ERROR_DELAY,
        }
    }
}

impl Backoff {
    /// Creates a backoff with explicit delays.
    #[inline]
    #[must_use]
    pub const fn new(idle: Duration, error: Duration) -> Self {
        Self { idle, error }
    }

    /// Sleep before the next iteration.
    #[inline]
    #[must_use]
    pub const fn delay(&self, outcome: PumpOutcome) -> Duration {
        match outcome {
            PumpOutcome::Data | PumpOutcome::Idle => self.idle,
            PumpOutcome::Failed => self.error,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::events::EventKind;

    #[test]
    fn test_initial_state() {
        let machine = ReconnectMachine::new();
        assert_eq!(machine.state(), LinkState::Disconnected);
        assert!(!machine.is_connected());
    }

    #[test]
    fn test_connect_success() {
        let mut machine = ReconnectMachine::new();
        machine.begin_connect();
        assert_eq!(machine.state(), LinkState::Connecting);
        assert!(!machine.is_connected());

        assert_eq!(machine.connected(), LinkEvent::Connect);
        assert!(machine.is_connected());
    }

    #[test]
    fn test_first_failure_is_silent() {
        let mut machine = ReconnectMachine::new();
        machine.begin_connect();
        assert_eq!(machine.connect_failed(false, "refused"), None);
        assert_eq!(machine.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_requested_report() {
        let mut machine = ReconnectMachine::new();
        machine.begin_connect();
        let event = machine.connect_failed(true, "refused").unwrap();
        assert_eq!(event.kind(), EventKind::ConnectErr);
    }

    #[test]
    fn test_loss_then_failures() {
        let mut machine = ReconnectMachine::new();
        machine.begin_connect();
        machine.connected();

        let lost = machine.transport_lost("closed").unwrap();
        assert_eq!(lost.kind(), EventKind::Disconnect);
        assert!(!machine.is_connected());

        machine.begin_connect();
        assert!(machine.connect_failed(false, "refused").is_some());

        // Later retries stay quiet.
        machine.begin_connect();
        assert!(machine.connect_failed(false, "refused").is_none());
    }

    #[test]
    fn test_loss_only_when_connected() {
        let mut machine = ReconnectMachine::new();
        assert!(machine.transport_lost("closed").is_none());

        machine.begin_connect();
        assert!(machine.transport_lost("closed").is_none());
    }

    #[test]
    fn test_reconnect_clears_loss() {
        let mut machine = ReconnectMachine::new();
        machine.begin_connect();
        machine.connected();
        machine.transport_lost("closed");

        machine.begin_connect();
        machine.connected();
        machine.begin_connect();
        assert!(machine.connect_failed(false, "refused").is_none());
    }

    #[test]
    fn test_explicit_disconnect_is_not_a_loss() {
        let mut machine = ReconnectMachine::new();
        machine.begin_connect();
        machine.connected();
        machine.disconnected();

        assert_eq!(machine.state(), LinkState::Disconnected);
        machine.begin_connect();
        assert!(machine.connect_failed(false, "refused").is_none());
    }

    #[test]
    fn test_backoff() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(PumpOutcome::Data), Duration::from_millis(1));
        assert_eq!(backoff.delay(PumpOutcome::Idle), Duration::from_millis(1));
        assert_eq!(backoff.delay(PumpOutcome::Failed), Duration::from_millis(100));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(
            serde_json::to_string(&LinkState::Connecting).unwrap(),
            r#""connecting""#
        );
    }
}
