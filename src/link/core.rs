//! The reconnecting device link.
//!
//! A [`Link`] owns at most one transport at a time, tracks connection state
//! through a [`ReconnectMachine`], and raises [`LinkEvent`]s to the current
//! handler table.
//!
//! # Locks
//!
//! | Lock | Guards | Held across I/O |
//! |------|--------|-----------------|
//! | `lifecycle` | connect and disconnect | yes (connect) |
//! | `transport` | the current transport slot | no |
//! | `machine` | state transitions | no |
//! | `write_lock` | writes and whole transfers | yes |
//!
//! Handlers are never called with any of these held, so a handler may call
//! back into the link.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::events::{Dispatcher, HandlerTable, LinkEvent};
use crate::protocol::marker;
use crate::protocol::{TransferMode, TransferStep, tokenize_line, transfer_plan};
use crate::transport::{Connector, Transport};

use super::config::{LinkBuilder, LinkConfig};
use super::state::{LinkState, ReconnectMachine};

// ============================================================================
// Link
// ============================================================================

/// A reconnecting session with one device.
///
/// # Example
///
/// ```no_run
/// use diii_link::Link;
///
/// # fn example() -> diii_link::Result<()> {
/// let link = Link::builder().endpoint("ws://localhost:8765").build()?;
/// link.reconnect(true)?;
/// link.write_line("print(1 + 1)")?;
/// link.execute("blink.lua")?;
/// # Ok(())
/// # }
/// ```
///
/// # Thread Safety
///
/// `Link` is `Send + Sync`. Share it with `Arc` between the pump thread and
/// callers.
pub struct Link {
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    machine: Mutex<ReconnectMachine>,
    dispatcher: Dispatcher,
    lifecycle: Mutex<()>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .field("handlers", &self.dispatcher.table())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Link {
    /// Creates a builder for a WebSocket link.
    #[inline]
    #[must_use]
    pub fn builder() -> LinkBuilder {
        LinkBuilder::new()
    }

    /// Creates a link that obtains transports from `connector`.
    ///
    /// The link starts disconnected with an empty handler table.
    #[must_use]
    pub fn with_connector(config: LinkConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            transport: RwLock::new(None),
            machine: Mutex::new(ReconnectMachine::new()),
            dispatcher: Dispatcher::default(),
            lifecycle: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Returns the endpoint the connector dials.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }
}

// ============================================================================
// Connection
// ============================================================================

impl Link {
    /// Connects if not already connected.
    ///
    /// A failure raises `connect_err` only right after a lost session.
    ///
    /// # Errors
    ///
    /// Whatever the connector fails with.
    #[inline]
    pub fn connect(&self) -> Result<()> {
        self.reconnect(false)
    }

    /// Connects if not already connected, with explicit error reporting.
    ///
    /// With `report_error` set, a failure always raises `connect_err`.
    ///
    /// # Errors
    ///
    /// Whatever the connector fails with.
    pub fn reconnect(&self, report_error: bool) -> Result<()> {
        let mut events = Vec::new();
        let result = self.establish(report_error, &mut events);

        for event in &events {
            self.raise(event);
        }
        result
    }

    /// Drops the transport. Raises nothing.
    pub fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.machine.lock().disconnected();
        self.release_transport();
        info!(endpoint = %self.connector.endpoint(), "Link disconnected");
    }

    /// Returns `true` iff the state is [`LinkState::Connected`].
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.machine.lock().is_connected()
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.machine.lock().state()
    }

    /// Runs one connection attempt, collecting the events to raise.
    fn establish(&self, report_error: bool, events: &mut Vec<LinkEvent>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let current = self.current_transport();
        let connected = self.machine.lock().is_connected();
        if connected && current.as_ref().is_some_and(|t| t.is_open()) {
            return Ok(());
        }
        if connected {
            events.extend(self.machine.lock().transport_lost("Connection closed"));
        }
        self.release_transport();

        let endpoint = self.connector.endpoint();
        self.machine.lock().begin_connect();
        debug!(%endpoint, "Connecting");

        match self.connector.connect() {
            Ok(transport) => {
                *self.transport.write() = Some(transport);
                events.push(self.machine.lock().connected());
                info!(%endpoint, "Link connected");
                Ok(())
            }
            Err(e) => {
                let failed = self.machine.lock().connect_failed(report_error, e.to_string());
                events.extend(failed);
                debug!(%endpoint, error = %e, "Connection attempt failed");
                Err(e)
            }
        }
    }

    /// Takes the transport out of its slot and closes it.
    fn release_transport(&self) {
        let stale = self.transport.write().take();
        if let Some(transport) = stale {
            transport.close();
        }
    }

    /// Snapshot of the current transport.
    pub(super) fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    /// Handles a read failure on `failed`.
    ///
    /// Ignored if the link has already moved to another transport.
    pub(super) fn transport_failed(&self, failed: &Arc<dyn Transport>, reason: &Error) {
        let event = {
            let _lifecycle = self.lifecycle.lock();
            let is_current = self
                .current_transport()
                .is_some_and(|t| std::ptr::addr_eq(Arc::as_ptr(&t), Arc::as_ptr(failed)));
            if !is_current {
                return;
            }

            self.release_transport();
            self.machine.lock().transport_lost(reason.to_string())
        };

        if let Some(event) = event {
            if reason.is_transport_error() {
                error!(endpoint = %self.connector.endpoint(), error = %reason, "Connection lost");
            } else {
                warn!(endpoint = %self.connector.endpoint(), error = %reason, "Connection dropped");
            }
            self.raise(&event);
        }
    }
}

// ============================================================================
// Writing
// ============================================================================

impl Link {
    /// Sends text as-is.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`] if not connected, or the transport's error.
    #[inline]
    pub fn write(&self, text: &str) -> Result<usize> {
        self.write_bytes(text.as_bytes())
    }

    /// Sends text followed by the line terminator.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn write_line(&self, text: &str) -> Result<usize> {
        self.write(&format!("{text}{}", marker::LINE_TERMINATOR))
    }

    /// Sends raw bytes.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn write_bytes(&self, data: &[u8]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        self.send(data)
    }

    /// Stores a script on the device.
    ///
    /// # Errors
    ///
    /// - [`Error::FileNotFound`] if `path` does not exist; nothing is sent
    /// - [`Error::NotOpen`] if not connected
    pub fn upload(&self, path: impl AsRef<Path>) -> Result<()> {
        self.transfer(path.as_ref(), TransferMode::Store)
    }

    /// Stores a script on the device and runs it.
    ///
    /// # Errors
    ///
    /// Same as [`upload`](Self::upload).
    pub fn execute(&self, path: impl AsRef<Path>) -> Result<()> {
        self.transfer(path.as_ref(), TransferMode::Execute)
    }

    fn transfer(&self, path: &Path, mode: TransferMode) -> Result<()> {
        let source = read_script(path)?;

        let started = match mode {
            TransferMode::Store => LinkEvent::Uploading {
                path: path.to_path_buf(),
            },
            TransferMode::Execute => LinkEvent::Running {
                path: path.to_path_buf(),
            },
        };
        self.raise(&started);

        let plan = transfer_plan(source.lines(), mode);
        let _guard = self.write_lock.lock();
        info!(path = %path.display(), ?mode, steps = plan.len(), "Transferring script");

        for step in plan {
            match step {
                TransferStep::Send(text) => {
                    self.send(format!("{text}{}", marker::LINE_TERMINATOR).as_bytes())?;
                }
                TransferStep::Pause(pause) => {
                    let delay = self.config.pacing.delay(pause);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }

        debug!(path = %path.display(), "Transfer complete");
        Ok(())
    }

    /// Writes one payload. Caller holds `write_lock`.
    fn send(&self, data: &[u8]) -> Result<usize> {
        let transport = self.current_transport().ok_or(Error::NotOpen)?;
        let payload = self.config.pad(data);
        let sent = transport.write(&payload)?;
        trace!(len = sent, "-> bytes");
        Ok(sent)
    }
}

/// Reads a whole script, decoding it lossily.
fn read_script(path: &Path) -> Result<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::file_not_found(path)),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Events
// ============================================================================

impl Link {
    /// Installs a new handler table, returning the previous one.
    ///
    /// Events raised afterwards only reach the new table.
    pub fn replace_handlers(&self, table: HandlerTable) -> Arc<HandlerTable> {
        self.dispatcher.replace(table)
    }

    /// Returns the current handler table.
    #[inline]
    #[must_use]
    pub fn handlers(&self) -> Arc<HandlerTable> {
        self.dispatcher.table()
    }

    /// Raises an event to the current handlers.
    ///
    /// Returns the number of handlers that failed.
    #[inline]
    pub fn raise(&self, event: &LinkEvent) -> usize {
        self.dispatcher.raise(event)
    }

    /// Tokenizes one device line and raises the result.
    pub fn process_line(&self, line: &str) {
        for token in tokenize_line(line) {
            self.raise(&LinkEvent::from(token));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
