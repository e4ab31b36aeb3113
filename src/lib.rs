//! diii-link - Host-side link to iii scripting devices.
//!
//! This library talks to an iii device exposed over a WebSocket bridge. It
//! turns the socket into a blocking byte stream, keeps the session alive
//! across failures, frames script transfers and turns device output into
//! typed events.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  lines   ┌──────────┐  bytes  ┌──────────┐  ws  ┌────────┐
//!  │ Dispatcher │◄─────────│   Link   │◄───────►│ WsBridge │◄────►│ device │
//!  │ (handlers) │  events  │ + pump   │         │ (thread) │      └────────┘
//!  └────────────┘          └──────────┘         └──────────┘
//! ```
//!
//! - The bridge owns the socket on its own thread and never reconnects
//! - The link owns the reconnect policy and the single writer lock
//! - Handler tables are swapped whole, never edited in place
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use diii_link::{EventKind, LinkEvent, Link, Result, spawn_pump};
//!
//! fn main() -> Result<()> {
//!     let link = Arc::new(
//!         Link::builder()
//!             .endpoint("ws://localhost:8765")
//!             .on(EventKind::Output, |event| {
//!                 if let LinkEvent::Output { line } = event {
//!                     println!("{line}");
//!                 }
//!                 Ok(())
//!             })
//!             .build()?,
//!     );
//!
//!     link.reconnect(true)?;
//!     let pump = spawn_pump(Arc::clone(&link))?;
//!
//!     link.execute("blink.lua")?;
//!     pump.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Event types and dispatch |
//! | [`link`] | Reconnecting link and read pump |
//! | [`protocol`] | Wire markers, tokenizer, transfer framing |
//! | [`session`] | Shell command parsing and rendering |
//! | [`transport`] | WebSocket bridge |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Event types and dispatch.
pub mod events;

/// Reconnecting link and read pump.
///
/// Use [`Link::builder()`] to create a link.
pub mod link;

/// Line protocol spoken by the device.
pub mod protocol;

/// Shell command parsing and event rendering.
pub mod session;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{Dispatcher, EventKind, Handler, HandlerResult, HandlerTable, LinkEvent};

// Link types
pub use link::{
    Backoff, Link, LinkBuilder, LinkConfig, LinkState, PumpHandle, PumpOutcome, spawn_pump,
};

// Protocol types
pub use protocol::{DeviceEvent, LineSplitter, Pacing, Token, TransferMode, tokenize_line};

// Session types
pub use session::{ShellCommand, ShellReply, ShellSession};

// Transport types
pub use transport::{BridgeConfig, Connector, Transport, WsBridge, WsConnector};
