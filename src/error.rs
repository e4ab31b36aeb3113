//! Error types for the device link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use diii_link::{Link, Result};
//!
//! fn example(link: &Link) -> Result<()> {
//!     link.write_line("print('hi')")?;
//!     link.upload("blink.lua")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Url`] |
//! | Not open | [`Error::NotOpen`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`] |
//! | Transport | [`Error::ConnectionClosed`], [`Error::Transport`], [`Error::WebSocket`] |
//! | Upload | [`Error::FileNotFound`] |
//! | Subscribers | [`Error::Handler`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::ParseError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when link configuration is invalid, e.g. an endpoint with
    /// a non-WebSocket scheme.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Endpoint could not be parsed as a URL.
    #[error("Invalid endpoint: {0}")]
    Url(#[from] ParseError),

    // ========================================================================
    // Not Open
    // ========================================================================
    /// Operation attempted while the transport is not open.
    #[error("Port is not open")]
    NotOpen,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Opening the connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection was not established within the open grace period.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Connection closed while the session was live.
    ///
    /// Returned by reads once buffered data is drained.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Mid-session I/O failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport error.
        message: String,
    },

    /// The socket failed mid-session.
    ///
    /// Returned by the first read after the queue drains.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    // ========================================================================
    // Upload Errors
    // ========================================================================
    /// Script source does not exist.
    #[error("File not found: {}", path.display())]
    FileNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    // ========================================================================
    // Subscriber Errors
    // ========================================================================
    /// An event subscriber failed.
    ///
    /// Only ever logged by the dispatcher; never returned to callers.
    #[error("Error in handler for \"{event}\": {message}")]
    Handler {
        /// Name of the event being dispatched.
        event: String,
        /// Failure reported by the handler.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a file not found error.
    #[inline]
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            event: event.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if opening a connection failed.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if a live session broke.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::Transport { .. } | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
