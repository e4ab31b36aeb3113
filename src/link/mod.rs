//! Reconnecting device link.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | Settings and builder |
//! | `core` | The [`Link`] itself |
//! | `pump` | Background read loop |
//! | `state` | Connection state machine and backoff |

// ============================================================================
// Submodules
// ============================================================================

/// Settings and builder.
pub mod config;

/// The link itself.
pub mod core;

/// Background read loop.
pub mod pump;

/// Connection state machine and backoff.
pub mod state;

#[cfg(test)]
mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{DEFAULT_ENDPOINT, LinkBuilder, LinkConfig, PACKET_SIZE};
pub use core::Link;
pub use pump::{PumpHandle, spawn_pump};
pub use state::{Backoff, LinkState, PumpOutcome, ReconnectMachine};
