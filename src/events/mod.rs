//! Link events and their dispatch.
//!
//! The link reports everything it observes as a [`LinkEvent`]. Consumers
//! install a [`HandlerTable`] and the [`Dispatcher`] delivers each event to
//! the handlers registered for its [`EventKind`].
//!
//! # Example
//!
//! ```ignore
//! use diii_link::{EventKind, HandlerTable, LinkEvent};
//!
//! let table = HandlerTable::new()
//!     .on(EventKind::Connect, |_| {
//!         println!("  <device connected>");
//!         Ok(())
//!     })
//!     .on(EventKind::Output, |event| {
//!         if let LinkEvent::Output { line } = event {
//!             println!("{line}");
//!         }
//!         Ok(())
//!     });
//!
//! link.replace_handlers(table);
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Subscriber table and dispatcher.
pub mod dispatcher;

/// Event types.
pub mod event;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::{Dispatcher, Handler, HandlerResult, HandlerTable};
pub use event::{EventKind, LinkEvent};
