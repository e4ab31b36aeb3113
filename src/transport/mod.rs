//! Byte-stream transport layer.
//!
//! This module turns a WebSocket connection to the device into a blocking,
//! serial-port-like stream, and defines the seams the link talks through.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Link           │                              │  iii device     │
//! │                 │         WebSocket            │                 │
//! │  dyn Transport  │◄────────────────────────────►│  line-oriented  │
//! │  (WsBridge)     │      ws://host:8765          │  interpreter    │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | WebSocket bridge and connector |
//! | `queue` | Blocking inbound byte queue |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket bridge and connector.
pub mod bridge;

/// Blocking inbound byte queue.
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{BridgeConfig, WsBridge, WsConnector, parse_endpoint};
pub use queue::InboundQueue;

// ============================================================================
// Transport
// ============================================================================

/// A blocking byte stream to the device.
///
/// Implementations never retry on their own; failures surface through
/// return values and [`is_open`](Transport::is_open).
pub trait Transport: Send + Sync {
    /// Opens the stream. No-op if already open.
    fn open(&self) -> Result<()>;

    /// Returns `true` if the stream is usable.
    fn is_open(&self) -> bool;

    /// Enqueues bytes for transmission, returning the count enqueued.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Waits up to `timeout` for inbound bytes; empty on timeout.
    fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Closes the stream. Idempotent.
    fn close(&self);
}

// ============================================================================
// Connector
// ============================================================================

/// Produces opened transports for the link.
///
/// Each call yields a fresh transport; the link drops the previous one.
pub trait Connector: Send + Sync {
    /// Constructs and opens a transport.
    fn connect(&self) -> Result<Arc<dyn Transport>>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}
