//! Line protocol spoken by iii devices.
//!
//! The device speaks plain text lines. Structure is carried by short
//! `^^` markers; the protocol layer never looks at the scripting language
//! itself.
//!
//! # Protocol Overview
//!
//! | Direction | Content |
//! |-----------|---------|
//! | Host → Device | Command lines, framed script transfers |
//! | Device → Host | Plain output lines, `^^name(args)` event lines |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `marker` | Fixed wire tokens |
//! | `tokenize` | Line splitting and event parsing |
//! | `frame` | Script transfer planning |

// ============================================================================
// Submodules
// ============================================================================

/// Fixed wire tokens.
pub mod marker;

/// Script transfer planning.
pub mod frame;

/// Line splitting and event parsing.
pub mod tokenize;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Pacing, Pause, TransferMode, TransferStep, transfer_plan};
pub use tokenize::{DeviceEvent, LineSplitter, Token, tokenize_line};
