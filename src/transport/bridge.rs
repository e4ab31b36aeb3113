//! WebSocket bridge with a blocking, serial-port-like interface.
//!
//! [`WsBridge`] owns one WebSocket connection. Its I/O runs on a dedicated
//! thread with a tokio current-thread runtime; callers only ever touch two
//! queues and a couple of flags, so every method here is synchronous.
//!
//! # Worker Loop
//!
//! ```text
//!   caller thread                      bridge thread (tokio)
//!  ┌──────────────┐   outbound mpsc   ┌──────────────────────┐
//!  │ write(bytes) │──────────────────►│ sender pump  → sink  │──► device
//!  │              │                   │                      │
//!  │ read(n, t)   │◄──────────────────│ receiver pump ← stream│◄── device
//!  └──────────────┘   InboundQueue    └──────────────────────┘
//!                        stop: watch<bool>
//! ```
//!
//! Either pump ending (remote close, error, stop signal) ends the other.
//! The bridge never reconnects by itself.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::queue::InboundQueue;
use super::{Connector, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Grace period for the connection to come up in [`WsBridge::open`].
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on waiting for the worker thread in [`WsBridge::close`].
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for the worker thread to finish.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Name of the worker thread.
const WORKER_THREAD_NAME: &str = "diii-ws-bridge";

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ============================================================================
// Endpoint
// ============================================================================

/// Parses and validates a device endpoint.
///
/// # Errors
///
/// - [`Error::Url`] if the string is not a URL
/// - [`Error::Config`] if the scheme is not `ws` or `wss`
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::config(format!(
            "Endpoint must use ws:// or wss://, got {other}://"
        ))),
    }
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Timing configuration for [`WsBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long `open` waits for the connection.
    pub open_timeout: Duration,
    /// How long `close` waits for the worker thread.
    pub close_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between the caller side and the worker thread.
#[derive(Debug, Default)]
struct Shared {
    open: AtomicBool,
    inbound: InboundQueue,
    /// Socket error that ended the connection, reported once by a read.
    failure: Mutex<Option<Error>>,
}

impl Shared {
    #[inline]
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Marks the connection unusable and wakes blocked readers.
    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
        self.inbound.close();
    }

    /// Keeps the first socket error seen on this connection.
    fn record_failure(&self, error: WsError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(Error::WebSocket(error));
        }
    }

    /// Replaces a drained-queue close with the socket error behind it.
    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(Error::ConnectionClosed) => {
                Err(self.failure.lock().take().unwrap_or(Error::ConnectionClosed))
            }
            other => other,
        }
    }

    fn pop(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.surface(self.inbound.pop(max_bytes, timeout))
    }

    fn pop_line(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.surface(self.inbound.pop_line(timeout))
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Handle to one running connection thread.
struct Worker {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    stop: watch::Sender<bool>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Stops the worker and waits up to `wait` for its thread to exit.
    ///
    /// A wait too large to represent as a deadline joins without a bound.
    fn shutdown(mut self, wait: Duration) {
        let _ = self.stop.send(true);
        self.shared.mark_closed();

        let Some(thread) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now().checked_add(wait);
        while !thread.is_finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(
                    timeout_ms = wait.as_millis() as u64,
                    "Bridge worker did not stop in time, detaching"
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if thread.join().is_err() {
            error!("Bridge worker panicked");
        }
    }
}

// ============================================================================
// WsBridge
// ============================================================================

/// A WebSocket connection presented as a blocking byte stream.
///
/// # Thread Safety
///
/// `WsBridge` is `Send + Sync`. `write` never blocks; `read` blocks only
/// up to its timeout; `open` and `close` block for bounded periods.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use diii_link::transport::{BridgeConfig, WsBridge, parse_endpoint};
///
/// # fn example() -> diii_link::Result<()> {
/// let bridge = WsBridge::new(parse_endpoint("ws://localhost:8765")?, BridgeConfig::default());
/// bridge.open()?;
/// bridge.write(b"print('hi')\r\n")?;
/// let reply = bridge.read(1024, Duration::from_millis(500))?;
/// bridge.close();
/// # Ok(())
/// # }
/// ```
pub struct WsBridge {
    endpoint: Mutex<Url>,
    config: BridgeConfig,
    /// Serializes `open` and `close`.
    lifecycle: Mutex<()>,
    worker: Mutex<Option<Worker>>,
}

impl WsBridge {
    /// Creates a closed bridge for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Url, config: BridgeConfig) -> Self {
        Self {
            endpoint: Mutex::new(endpoint),
            config,
            lifecycle: Mutex::new(()),
            worker: Mutex::new(None),
        }
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> Url {
        self.endpoint.lock().clone()
    }

    /// Changes the endpoint used by the next `open`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the bridge is open, or the scheme is invalid
    /// - [`Error::Url`] if the endpoint does not parse
    pub fn set_endpoint(&self, endpoint: &str) -> Result<()> {
        if self.is_open() {
            return Err(Error::config("Cannot change endpoint while open"));
        }
        *self.endpoint.lock() = parse_endpoint(endpoint)?;
        Ok(())
    }

    /// Returns the timing configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> BridgeConfig {
        self.config
    }

    /// Starts the worker thread and waits for the connection.
    ///
    /// No-op if already open. A previous connection that has since died is
    /// reaped first.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the WebSocket handshake fails
    /// - [`Error::ConnectionTimeout`] if not connected within the open timeout
    /// - [`Error::Io`] if the worker thread cannot be spawned
    pub fn open(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let stale = {
            let mut slot = self.worker.lock();
            if slot.as_ref().is_some_and(|w| w.shared.is_open()) {
                return Ok(());
            }
            slot.take()
        };
        if let Some(stale) = stale {
            debug!("Reaping dead bridge worker");
            stale.shutdown(self.config.close_timeout);
        }

        let url = self.endpoint();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let shared = Arc::new(Shared::default());

        let thread = {
            let url = url.clone();
            let shared = Arc::clone(&shared);
            let close_timeout = self.config.close_timeout;
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.into())
                .spawn(move || {
                    run_worker(url, outbound_rx, stop_rx, shared, ready_tx, close_timeout);
                })?
        };

        let worker = Worker {
            outbound: outbound_tx,
            stop: stop_tx,
            shared,
            thread: Some(thread),
        };

        match ready_rx.recv_timeout(self.config.open_timeout) {
            Ok(Ok(())) => {
                info!(%url, "Bridge open");
                *self.worker.lock() = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                worker.shutdown(self.config.close_timeout);
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                worker.shutdown(self.config.close_timeout);
                Err(Error::connection_timeout(
                    self.config.open_timeout.as_millis() as u64,
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                worker.shutdown(self.config.close_timeout);
                Err(Error::connection("Bridge worker exited before connecting"))
            }
        }
    }

    /// Returns `true` if the connection is usable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| w.shared.is_open())
    }

    /// Enqueues bytes for transmission and returns immediately.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`] if the bridge is not open.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let slot = self.worker.lock();
        let worker = slot
            .as_ref()
            .filter(|w| w.shared.is_open())
            .ok_or(Error::NotOpen)?;

        worker
            .outbound
            .send(data.to_vec())
            .map_err(|_| Error::NotOpen)?;

        trace!(len = data.len(), "Queued for send");
        Ok(data.len())
    }

    /// Waits up to `timeout` for inbound data, returning at most `max_bytes`.
    ///
    /// Returns an empty vector if nothing arrived in time. Data received
    /// before a disconnect is still returned.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the bridge was never opened or was closed
    /// - [`Error::WebSocket`] once the queue is drained, if a socket error
    ///   ended the connection (reported by the first such read only)
    /// - [`Error::ConnectionClosed`] once the connection died and the queue
    ///   is drained
    pub fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let shared = self.shared()?;
        let data = shared.pop(max_bytes, timeout)?;
        if !data.is_empty() {
            trace!(len = data.len(), "Read from inbound queue");
        }
        Ok(data)
    }

    /// Waits up to `timeout` for bytes through the next `\n`.
    ///
    /// Returns a partial line if the timeout elapses first.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn read_line(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.shared()?.pop_line(timeout)
    }

    /// Number of received bytes not yet read.
    #[must_use]
    pub fn in_waiting(&self) -> usize {
        self.worker
            .lock()
            .as_ref()
            .map_or(0, |w| w.shared.inbound.buffered())
    }

    /// Stops the worker and releases the connection. Idempotent.
    pub fn close(&self) {
        let _lifecycle = self.lifecycle.lock();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown(self.config.close_timeout);
            info!(url = %self.endpoint(), "Bridge closed");
        }
    }

    /// Returns the shared state of the current connection.
    fn shared(&self) -> Result<Arc<Shared>> {
        self.worker
            .lock()
            .as_ref()
            .map(|w| Arc::clone(&w.shared))
            .ok_or(Error::NotOpen)
    }
}

impl Drop for WsBridge {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.shutdown(self.config.close_timeout);
        }
    }
}

impl Transport for WsBridge {
    fn open(&self) -> Result<()> {
        WsBridge::open(self)
    }

    fn is_open(&self) -> bool {
        WsBridge::is_open(self)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        WsBridge::write(self, data)
    }

    fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        WsBridge::read(self, max_bytes, timeout)
    }

    fn close(&self) {
        WsBridge::close(self);
    }
}

// ============================================================================
// WsConnector
// ============================================================================

/// Opens a fresh [`WsBridge`] per connection attempt.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Url,
    config: BridgeConfig,
}

impl WsConnector {
    /// Creates a connector for `endpoint`.
    #[inline]
    #[must_use]
    pub fn new(endpoint: Url, config: BridgeConfig) -> Self {
        Self { endpoint, config }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        let bridge = WsBridge::new(self.endpoint.clone(), self.config);
        bridge.open()?;
        Ok(Arc::new(bridge))
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}

// ============================================================================
// Worker Thread
// ============================================================================

/// Entry point of the bridge thread.
fn run_worker(
    url: Url,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: watch::Receiver<bool>,
    shared: Arc<Shared>,
    ready: SyncSender<Result<()>>,
    close_timeout: Duration,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(Error::Io(e)));
            shared.mark_closed();
            return;
        }
    };

    runtime.block_on(run_connection(
        url,
        outbound,
        stop,
        &shared,
        ready,
        close_timeout,
    ));

    shared.mark_closed();
    debug!("Bridge worker finished");
}

/// Connects, then runs both pumps until one of them ends.
async fn run_connection(
    url: Url,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: watch::Receiver<bool>,
    shared: &Shared,
    ready: SyncSender<Result<()>>,
    close_timeout: Duration,
) {
    let mut stop_connect = stop.clone();
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = stop_connect.wait_for(|stopped| *stopped) => {
            debug!(%url, "Stopped before connection was established");
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            debug!(%url, error = %e, "WebSocket connect failed");
            let _ = ready.send(Err(Error::connection(format!("{url}: {e}"))));
            return;
        }
    };

    shared.open.store(true, Ordering::Release);
    let _ = ready.send(Ok(()));
    debug!(%url, "WebSocket connected");

    let (mut ws_write, mut ws_read) = ws_stream.split();

    tokio::select! {
        () = pump_outbound(&mut ws_write, outbound, shared, stop.clone()) => {
            debug!("Sender pump finished");
        }
        () = pump_inbound(&mut ws_read, shared, stop.clone()) => {
            debug!("Receiver pump finished");
        }
    }

    shared.mark_closed();

    match timeout(close_timeout, ws_write.close()).await {
        Ok(Ok(())) => debug!("Close frame sent"),
        Ok(Err(e)) => debug!(error = %e, "Close after disconnect failed"),
        Err(_) => debug!("Timed out sending close frame"),
    }
}

/// Drains the outbound queue into the socket.
async fn pump_outbound(
    ws_write: &mut WsSink,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: &Shared,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,

            chunk = outbound.recv() => {
                let Some(bytes) = chunk else {
                    break;
                };
                let len = bytes.len();
                if let Err(e) = ws_write.send(Message::Binary(bytes.into())).await {
                    warn!(error = %e, "WebSocket send failed");
                    shared.record_failure(e);
                    break;
                }
                trace!(len, "Sent");
            }
        }
    }
}

/// Forwards received messages into the inbound queue.
async fn pump_inbound(ws_read: &mut WsSource, shared: &Shared, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,

            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Binary(data))) => shared.inbound.push(data.to_vec()),

                    Some(Ok(Message::Text(text))) => {
                        shared.inbound.push(text.as_str().as_bytes().to_vec());
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        shared.record_failure(e);
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Ping, Pong, Frame
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
