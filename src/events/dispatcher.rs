//! Event dispatch to subscribers.
//!
//! A [`HandlerTable`] maps each [`EventKind`] to an ordered list of
//! handlers. The [`Dispatcher`] holds the current table behind an `Arc` and
//! swaps it whole, so a dispatch in progress keeps the table it started
//! with and never sees a half-built one.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use crate::error::Error;

use super::event::{EventKind, LinkEvent};

// ============================================================================
// Types
// ============================================================================

/// Value returned by a handler. An `Err` is logged and isolated.
pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;

/// Event handler callback type.
pub type Handler = Arc<dyn Fn(&LinkEvent) -> HandlerResult + Send + Sync>;

// ============================================================================
// HandlerTable
// ============================================================================

/// Subscribers per event kind, in registration order.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: FxHashMap<EventKind, Vec<Handler>>,
}

impl HandlerTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `kind`, builder style.
    #[must_use]
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&LinkEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(kind, handler);
        self
    }

    /// Adds a handler for `kind`.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&LinkEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Returns the handlers for `kind`.
    #[inline]
    #[must_use]
    pub fn handlers(&self, kind: EventKind) -> &[Handler] {
        self.handlers.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of handlers across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Returns `true` if no handlers are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            let count = self.handlers(kind).len();
            if count > 0 {
                map.entry(&kind, &count);
            }
        }
        map.finish()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Raises events to the current handler table.
#[derive(Debug, Default)]
pub struct Dispatcher {
    table: RwLock<Arc<HandlerTable>>,
}

impl Dispatcher {
    /// Creates a dispatcher with the given table.
    #[must_use]
    pub fn new(table: HandlerTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Replaces the whole handler table.
    ///
    /// Takes effect for the next raised event. Returns the previous table.
    pub fn replace(&self, table: HandlerTable) -> Arc<HandlerTable> {
        std::mem::replace(&mut *self.table.write(), Arc::new(table))
    }

    /// Returns the current table.
    #[inline]
    #[must_use]
    pub fn table(&self) -> Arc<HandlerTable> {
        Arc::clone(&*self.table.read())
    }

    /// Invokes every handler registered for the event's kind, in order.
    ///
    /// A handler that returns an error or panics is logged and skipped;
    /// the remaining handlers still run. Returns the number of handlers
    /// that failed.
    pub fn raise(&self, event: &LinkEvent) -> usize {
        let table = self.table();
        let kind = event.kind();
        let mut failed = 0;

        for handler in table.handlers(kind) {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            failed += 1;
            let err = Error::handler(kind.as_str(), message);
            error!(event = %kind, error = %err, "Event handler failed");
        }

        trace!(event = %kind, failed, "Event raised");
        failed
    }
}

/// Extracts the text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

// ============================================================================
// Tests
// ============================================================================
