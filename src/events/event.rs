//! Link event types.
//!
//! Every notification the link raises is a [`LinkEvent`]. Subscribers are
//! keyed by [`EventKind`], one kind per variant.
//!
//! # Event Kinds
//!
//! | Kind | Raised when |
//! |------|-------------|
//! | `connect` | A connection attempt succeeded |
//! | `connect_err` | A connection attempt failed and is reportable |
//! | `disconnect` | A live session was lost |
//! | `uploading` | A store-only transfer starts |
//! | `running` | A store-and-run transfer starts |
//! | `event` | The device emitted `^^name(args)` |
//! | `output` | The device emitted a plain line |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::protocol::{DeviceEvent, Token};

// ============================================================================
// EventKind
// ============================================================================

/// Discriminant of [`LinkEvent`], used as the subscriber table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Connection established.
    Connect,
    /// Connection attempt failed.
    ConnectErr,
    /// Live session lost.
    Disconnect,
    /// Store-only transfer started.
    Uploading,
    /// Store-and-run transfer started.
    Running,
    /// Structured device event.
    Event,
    /// Plain device output.
    Output,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Connect,
        Self::ConnectErr,
        Self::Disconnect,
        Self::Uploading,
        Self::Running,
        Self::Event,
        Self::Output,
    ];

    /// Returns the wire name of this kind.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectErr => "connect_err",
            Self::Disconnect => "disconnect",
            Self::Uploading => "uploading",
            Self::Running => "running",
            Self::Event => "event",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::config(format!("Unknown event kind: {s}")))
    }
}

// ============================================================================
// LinkEvent
// ============================================================================

/// An event raised by the link.
///
/// # JSON Format
///
/// ```json
/// { "event": "disconnect", "reason": "Connection closed" }
/// { "event": "event", "line": "^^stream(1,2)", "name": "stream", "args": ["1", "2"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// Connection established.
    Connect,

    /// Connection attempt failed.
    ConnectErr {
        /// Error description.
        message: String,
    },

    /// Live session lost.
    Disconnect {
        /// Why the session ended.
        reason: String,
    },

    /// Store-only transfer started.
    Uploading {
        /// Script being transferred.
        path: PathBuf,
    },

    /// Store-and-run transfer started.
    Running {
        /// Script being transferred.
        path: PathBuf,
    },

    /// Structured device event.
    Event(DeviceEvent),

    /// Plain device output.
    Output {
        /// The line, without terminator.
        line: String,
    },
}

impl LinkEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connect => EventKind::Connect,
            Self::ConnectErr { .. } => EventKind::ConnectErr,
            Self::Disconnect { .. } => EventKind::Disconnect,
            Self::Uploading { .. } => EventKind::Uploading,
            Self::Running { .. } => EventKind::Running,
            Self::Event(_) => EventKind::Event,
            Self::Output { .. } => EventKind::Output,
        }
    }

    /// Serializes the event as a single JSON line.
    ///
    /// Used by collaborators that forward events over a socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if serialization fails.
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::transport(e.to_string()))
    }
}

impl From<Token> for LinkEvent {
    fn from(token: Token) -> Self {
        match token {
            Token::Event(event) => Self::Event(event),
            Token::Output(line) => Self::Output { line },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
