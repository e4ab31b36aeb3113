//! In-memory transport and connector for link tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::events::{EventKind, HandlerTable, LinkEvent};
use crate::protocol::Pacing;
use crate::transport::{Connector, InboundQueue, Transport};

use super::config::LinkConfig;
use super::core::Link;
use super::state::Backoff;

/// A transport whose inbound side is fed by the test.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    open: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    inbound: InboundQueue,
}

impl MockTransport {
    /// Queues bytes as if the device sent them.
    pub(crate) fn feed(&self, data: &[u8]) {
        self.inbound.push(data.to_vec());
    }

    /// Simulates the connection dying.
    pub(crate) fn fail(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.inbound.close();
    }

    /// Every write, in order.
    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Every write, decoded.
    pub(crate) fn written_text(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

impl Transport for MockTransport {
    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        self.writes.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.inbound.pop(max_bytes, timeout)
    }

    fn close(&self) {
        self.fail();
    }
}

/// Hands out [`MockTransport`]s, or refuses while `refuse` is set.
#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    refuse: AtomicBool,
    attempts: AtomicUsize,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn refusing() -> Arc<Self> {
        let connector = Self::new();
        connector.set_refuse(true);
        connector
    }

    pub(crate) fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The most recently issued transport.
    pub(crate) fn latest(&self) -> Arc<MockTransport> {
        self.transports
            .lock()
            .last()
            .cloned()
            .expect("no transport issued yet")
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection("Connection refused"));
        }

        let transport = Arc::new(MockTransport::default());
        transport.open()?;
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }

    fn endpoint(&self) -> String {
        "mock://device".to_owned()
    }
}

/// Fast settings: no pacing, short reads and delays.
pub(crate) fn test_config() -> LinkConfig {
    LinkConfig::new()
        .with_read_timeout(Duration::from_millis(20))
        .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
        .with_pacing(Pacing::none())
}

pub(crate) fn test_link(connector: &Arc<MockConnector>) -> Link {
    let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
    Link::with_connector(test_config(), connector)
}

/// A table recording every event of every kind.
pub(crate) fn recording_table() -> (HandlerTable, Arc<Mutex<Vec<LinkEvent>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut table = HandlerTable::new();
    for kind in EventKind::ALL {
        let log = Arc::clone(&log);
        table.subscribe(kind, move |event| {
            log.lock().push(event.clone());
            Ok(())
        });
    }
    (table, log)
}

/// Kinds of the recorded events, in order.
pub(crate) fn kinds(log: &Mutex<Vec<LinkEvent>>) -> Vec<EventKind> {
    log.lock().iter().map(LinkEvent::kind).collect()
}
