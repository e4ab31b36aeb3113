//! Link configuration and builder.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use diii_link::{EventKind, Link};
//!
//! # fn example() -> diii_link::Result<()> {
//! let link = Link::builder()
//!     .endpoint("ws://192.168.1.40:8765")
//!     .read_timeout(Duration::from_millis(200))
//!     .on(EventKind::Output, |event| {
//!         println!("{event:?}");
//!         Ok(())
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::events::{EventKind, HandlerResult, HandlerTable, LinkEvent};
use crate::protocol::Pacing;
use crate::transport::{BridgeConfig, WsConnector, parse_endpoint};

use super::core::Link;
use super::state::Backoff;

// ============================================================================
// Constants
// ============================================================================

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8765";

/// USB packet size of the device.
pub const PACKET_SIZE: usize = 64;

/// How long one pump read waits for data.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Most bytes taken per pump read.
const DEFAULT_READ_CHUNK: usize = 10_000;

// ============================================================================
// LinkConfig
// ============================================================================

/// Settings for a [`Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// WebSocket endpoint of the device.
    pub endpoint: String,

    /// How long a connection attempt may take.
    pub open_timeout: Duration,

    /// How long closing the transport may take.
    pub close_timeout: Duration,

    /// How long one pump read waits for data.
    pub read_timeout: Duration,

    /// Most bytes taken per pump read.
    pub read_chunk: usize,

    /// Delays between pump iterations.
    pub backoff: Backoff,

    /// Delays inside script transfers.
    pub pacing: Pacing,

    /// Append `\n` to payloads that fill whole packets.
    pub pad_full_packets: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            open_timeout: bridge.open_timeout,
            close_timeout: bridge.close_timeout,
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_chunk: DEFAULT_READ_CHUNK,
            backoff: Backoff::default(),
            pacing: Pacing::default(),
            pad_full_packets: true,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint.
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the connection attempt timeout.
    #[inline]
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the close timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the pump read timeout.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the most bytes taken per pump read.
    #[inline]
    #[must_use]
    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes;
        self
    }

    /// Sets the pump backoff.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets transfer pacing.
    #[inline]
    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Enables or disables full-packet padding.
    #[inline]
    #[must_use]
    pub fn with_pad_full_packets(mut self, enabled: bool) -> Self {
        self.pad_full_packets = enabled;
        self
    }
}

// ============================================================================
// Derived Settings
// ============================================================================

impl LinkConfig {
    /// Bridge timing derived from this configuration.
    #[inline]
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            open_timeout: self.open_timeout,
            close_timeout: self.close_timeout,
        }
    }

    /// Validates the configuration and returns the parsed endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the endpoint is not a URL
    /// - [`Error::Config`] if the scheme is wrong or `read_chunk` is zero
    pub fn validate(&self) -> Result<Url> {
        if self.read_chunk == 0 {
            return Err(Error::config("read_chunk must be greater than zero"));
        }
        parse_endpoint(&self.endpoint)
    }

    /// Applies full-packet padding to an outgoing payload.
    ///
    /// A payload whose length is a non-zero multiple of [`PACKET_SIZE`]
    /// gets a trailing `\n`.
    #[must_use]
    pub fn pad(&self, data: &[u8]) -> Vec<u8> {
        let mut payload = data.to_vec();
        if self.pad_full_packets && !payload.is_empty() && payload.len() % PACKET_SIZE == 0 {
            payload.push(b'\n');
        }
        payload
    }
}

// ============================================================================
// LinkBuilder
// ============================================================================

/// Builder for a [`Link`] talking to a WebSocket endpoint.
///
/// Use [`Link::builder()`] to create one.
#[derive(Debug, Default, Clone)]
pub struct LinkBuilder {
    config: LinkConfig,
    handlers: HandlerTable,
}

impl LinkBuilder {
    /// Creates a builder with default settings and no handlers.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Sets the pump read timeout.
    #[inline]
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets transfer pacing.
    #[inline]
    #[must_use]
    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.config.pacing = pacing;
        self
    }

    /// Sets the initial handler table.
    #[inline]
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Adds a handler to the initial table.
    #[must_use]
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&LinkEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.subscribe(kind, handler);
        self
    }

    /// Builds the link. Does not connect.
    ///
    /// # Errors
    ///
    /// See [`LinkConfig::validate`].
    pub fn build(self) -> Result<Link> {
        let endpoint = self.config.validate()?;
        let connector = WsConnector::new(endpoint, self.config.bridge_config());

        let link = Link::with_connector(self.config, Arc::new(connector));
        link.replace_handlers(self.handlers);
        Ok(link)
    }
}

// ============================================================================
// Tests
// ============================================================================
