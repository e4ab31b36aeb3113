//! Background read pump.
//!
//! The pump drains the transport, splits the bytes into lines and raises
//! the tokens. A failed read marks the session lost and immediately tries
//! to reconnect; the pump keeps going until it is told to stop.
//!
//! ```text
//! loop:
//!   read(chunk, timeout) ─┬─ data  → split → tokenize → raise → sleep(idle)
//!                         ├─ empty →                          sleep(idle)
//!                         └─ error → disconnect → reconnect → sleep(error)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::protocol::LineSplitter;

use super::core::Link;
use super::state::PumpOutcome;

// ============================================================================
// Constants
// ============================================================================

/// Name of the pump thread.
const PUMP_THREAD_NAME: &str = "diii-link-pump";

/// Longest single sleep, so a stop request is noticed quickly.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Pump
// ============================================================================

impl Link {
    /// Runs one pump iteration.
    ///
    /// Lines split across reads are kept in `splitter` until complete.
    pub fn pump_once(&self, splitter: &mut LineSplitter) -> PumpOutcome {
        let Some(transport) = self.current_transport() else {
            return self.recover();
        };

        let config = self.config();
        match transport.read(config.read_chunk, config.read_timeout) {
            Ok(data) if data.is_empty() => {
                self.flush_partial(splitter);
                PumpOutcome::Idle
            }
            Ok(data) => {
                debug!(len = data.len(), "<- bytes");
                for line in splitter.push(&data) {
                    trace!(%line, "Device line");
                    self.process_line(&line);
                }
                PumpOutcome::Data
            }
            Err(e) => {
                self.flush_partial(splitter);
                self.transport_failed(&transport, &e);
                self.recover()
            }
        }
    }

    /// Pumps until `stop` is set.
    pub fn read_forever(&self, stop: &AtomicBool) {
        let mut splitter = LineSplitter::new();
        debug!(endpoint = %self.endpoint(), "Pump started");

        while !stop.load(Ordering::Acquire) {
            let outcome = self.pump_once(&mut splitter);
            sleep_unless_stopped(self.config().backoff.delay(outcome), stop);
        }

        debug!(endpoint = %self.endpoint(), "Pump stopped");
    }

    /// Raises an unterminated tail, such as a prompt, as a line of its own.
    fn flush_partial(&self, splitter: &mut LineSplitter) {
        if let Some(line) = splitter.flush() {
            trace!(%line, "Device partial line");
            self.process_line(&line);
        }
    }

    /// Reconnects silently after a failure.
    fn recover(&self) -> PumpOutcome {
        if let Err(e) = self.reconnect(false) {
            trace!(error = %e, "Reconnect failed");
        }
        PumpOutcome::Failed
    }
}

/// Sleeps for `delay` in short steps, returning early once `stop` is set.
///
/// A delay too large to represent as a deadline sleeps until stopped.
fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) {
    let deadline = Instant::now().checked_add(delay);
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let step = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return;
                }
                (deadline - now).min(STOP_POLL_INTERVAL)
            }
            None => STOP_POLL_INTERVAL,
        };
        thread::sleep(step);
    }
}

// ============================================================================
// PumpHandle
// ============================================================================

/// Runs [`Link::read_forever`] on its own thread.
///
/// # Errors
///
/// [`Error::Io`](crate::Error::Io) if the thread cannot be spawned.
pub fn spawn_pump(link: Arc<Link>) -> Result<PumpHandle> {
    let stop = Arc::new(AtomicBool::new(false));

    let thread = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(PUMP_THREAD_NAME.to_owned())
            .spawn(move || link.read_forever(&stop))?
    };

    Ok(PumpHandle {
        stop,
        thread: Some(thread),
    })
}

/// Owner of a running pump thread. Stops and joins it on drop.
#[derive(Debug)]
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PumpHandle {
    /// Returns `true` while the pump thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the pump and waits for the current iteration to end.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Pump thread panicked");
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write as _;

    use parking_lot::Mutex;
    use tempfile::NamedTempFile;

    use crate::events::{EventKind, HandlerTable, LinkEvent};
    use crate::link::Backoff;
    use crate::link::mock::{MockConnector, kinds, recording_table, test_link};
    use crate::protocol::{DeviceEvent, Pacing};
    use crate::transport::testing::{TestServer, init_tracing};

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_pump_raises_lines() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);

        connector.latest().feed(b"^^stream(1,2)\r\nhello\r\n");
        let mut splitter = LineSplitter::new();
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Data);

        assert_eq!(
            *log.lock(),
            [
                LinkEvent::Event(DeviceEvent::new("^^stream(1,2)", "stream", ["1", "2"])),
                LinkEvent::Output {
                    line: "hello".into()
                },
            ]
        );
    }

    #[test]
    fn test_pump_idle() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();

        let mut splitter = LineSplitter::new();
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Idle);
    }

    #[test]
    fn test_idle_read_flushes_prompt() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);
        let mut splitter = LineSplitter::new();

        connector.latest().feed(b"lua> ");
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Data);
        assert!(log.lock().is_empty());
        assert_eq!(splitter.pending(), 5);

        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Idle);
        assert_eq!(
            *log.lock(),
            [LinkEvent::Output {
                line: "lua> ".into()
            }]
        );
        assert_eq!(splitter.pending(), 0);

        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Idle);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_loss_flushes_tail_before_disconnect() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);
        let mut splitter = LineSplitter::new();

        connector.set_refuse(true);
        connector.latest().feed(b"ok\nfinal words");
        connector.latest().fail();

        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Data);
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);

        let events = log.lock().clone();
        assert_eq!(
            events[..2],
            [
                LinkEvent::Output { line: "ok".into() },
                LinkEvent::Output {
                    line: "final words".into()
                },
            ]
        );
        assert_eq!(
            kinds(&log)[2..],
            [EventKind::Disconnect, EventKind::ConnectErr]
        );
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_pump_joins_split_lines() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);
        let mut splitter = LineSplitter::new();

        connector.latest().feed(b"hel");
        link.pump_once(&mut splitter);
        assert!(log.lock().is_empty());

        connector.latest().feed(b"lo\r\n");
        link.pump_once(&mut splitter);
        assert_eq!(
            *log.lock(),
            [LinkEvent::Output {
                line: "hello".into()
            }]
        );
    }

    #[test]
    fn test_loss_raises_disconnect_before_connect_err() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);

        connector.set_refuse(true);
        connector.latest().fail();

        let mut splitter = LineSplitter::new();
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);
        assert!(!link.is_connected());
        assert_eq!(kinds(&log), [EventKind::Disconnect, EventKind::ConnectErr]);

        // Later retries are silent.
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);
        assert_eq!(kinds(&log), [EventKind::Disconnect, EventKind::ConnectErr]);
        assert_eq!(connector.attempts(), 3);
    }

    #[test]
    fn test_loss_then_recovery() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);

        connector.latest().fail();
        let mut splitter = LineSplitter::new();
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);

        assert!(link.is_connected());
        assert_eq!(kinds(&log), [EventKind::Disconnect, EventKind::Connect]);
    }

    #[test]
    fn test_buffered_data_read_before_loss() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        link.connect().unwrap();
        let (table, log) = recording_table();
        link.replace_handlers(table);

        connector.set_refuse(true);
        connector.latest().feed(b"last words\n");
        connector.latest().fail();

        let mut splitter = LineSplitter::new();
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Data);
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);
        assert_eq!(
            kinds(&log),
            [EventKind::Output, EventKind::Disconnect, EventKind::ConnectErr]
        );
    }

    #[test]
    fn test_pump_connects_when_idle() {
        let connector = MockConnector::new();
        let link = test_link(&connector);
        let (table, log) = recording_table();
        link.replace_handlers(table);

        let mut splitter = LineSplitter::new();
        assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);
        assert!(link.is_connected());
        assert_eq!(kinds(&log), [EventKind::Connect]);
    }

    #[test]
    fn test_never_connected_failures_are_silent() {
        let connector = MockConnector::refusing();
        let link = test_link(&connector);
        let (table, log) = recording_table();
        link.replace_handlers(table);

        let mut splitter = LineSplitter::new();
        for _ in 0..3 {
            assert_eq!(link.pump_once(&mut splitter), PumpOutcome::Failed);
        }
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_spawned_pump_delivers_and_stops() {
        let connector = MockConnector::new();
        let link = Arc::new(test_link(&connector));
        link.connect().unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        {
            let lines = Arc::clone(&lines);
            link.replace_handlers(HandlerTable::new().on(EventKind::Output, move |event| {
                if let LinkEvent::Output { line } = event {
                    lines.lock().push(line.clone());
                }
                Ok(())
            }));
        }

        let pump = spawn_pump(Arc::clone(&link)).unwrap();
        assert!(pump.is_running());
        connector.latest().feed(b"one\ntwo\n");
        assert!(wait_until(|| lines.lock().len() == 2));

        let started = Instant::now();
        pump.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(*lines.lock(), ["one", "two"]);
    }

    #[test]
    fn test_sleep_unless_stopped() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        sleep_unless_stopped(Duration::from_secs(5), &stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_with_unbounded_delay_stops() {
        let stop = Arc::new(AtomicBool::new(false));
        let sleeper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || sleep_unless_stopped(Duration::MAX, &stop))
        };

        thread::sleep(Duration::from_millis(30));
        stop.store(true, Ordering::Release);
        assert!(sleeper.join().is_ok());
    }

    #[test]
    fn test_pump_with_unbounded_backoff_shuts_down() {
        let connector = MockConnector::refusing();
        let config = crate::link::mock::test_config()
            .with_backoff(Backoff::new(Duration::MAX, Duration::MAX));
        let link = Arc::new(Link::with_connector(config, connector));

        let pump = spawn_pump(Arc::clone(&link)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(pump.is_running());

        let started = Instant::now();
        pump.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_end_to_end_over_websocket() {
        init_tracing();
        let server = TestServer::echo();
        let link = Arc::new(
            Link::builder()
                .endpoint(server.url())
                .read_timeout(Duration::from_millis(20))
                .pacing(Pacing::none())
                .build()
                .unwrap(),
        );
        let (table, log) = recording_table();
        link.replace_handlers(table);
        link.reconnect(true).unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"a = 1\nprint(a)\n").unwrap();
        link.execute(file.path()).unwrap();

        let expected = "^^s\r\na = 1\r\nprint(a)\r\n^^e\r\n^^z\r\n";
        assert_eq!(server.wait_received(expected.len()), expected.as_bytes());

        let pump = spawn_pump(Arc::clone(&link)).unwrap();
        assert!(wait_until(|| {
            log.lock()
                .iter()
                .filter(|e| e.kind() == EventKind::Event)
                .count()
                >= 3
        }));
        pump.shutdown();

        let names: Vec<String> = log
            .lock()
            .iter()
            .filter_map(|event| match event {
                LinkEvent::Event(device) => Some(device.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["s", "e", "z"]);
        assert_eq!(kinds(&log)[..2], [EventKind::Connect, EventKind::Running]);
    }
}
