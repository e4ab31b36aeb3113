//! Blocking inbound byte queue.
//!
//! Filled by the bridge worker as messages arrive, drained by callers of
//! the synchronous read API. Chunks keep their arrival order; a chunk is
//! only split when a caller asks for fewer bytes than it holds.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

// ============================================================================
// QueueState
// ============================================================================

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<Vec<u8>>,
    buffered: usize,
    closed: bool,
}

impl QueueState {
    /// Takes whole chunks while they fit in `max` bytes.
    ///
    /// An oversized front chunk is split and its tail stays queued.
    fn take(&mut self, max: usize) -> Vec<u8> {
        if max == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();

        while let Some(front) = self.chunks.front_mut() {
            if out.is_empty() && front.len() > max {
                let tail = front.split_off(max);
                out = std::mem::replace(front, tail);
                break;
            }
            if out.len() + front.len() > max {
                break;
            }
            if let Some(chunk) = self.chunks.pop_front() {
                out.extend_from_slice(&chunk);
            }
        }

        self.buffered -= out.len();
        out
    }

    /// Takes bytes up to and including the first `\n`, if one is queued.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let mut len = 0;
        let mut found = false;
        for chunk in &self.chunks {
            if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                len += pos + 1;
                found = true;
                break;
            }
            len += chunk.len();
        }

        found.then(|| self.take_exact(len))
    }

    /// Takes exactly `len` bytes, splitting the last chunk if needed.
    fn take_exact(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);

        while out.len() < len {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let wanted = len - out.len();
            if front.len() > wanted {
                let tail = front.split_off(wanted);
                out.extend_from_slice(front);
                *front = tail;
            } else if let Some(chunk) = self.chunks.pop_front() {
                out.extend_from_slice(&chunk);
            }
        }

        self.buffered -= out.len();
        out
    }
}

// ============================================================================
// InboundQueue
// ============================================================================

/// FIFO of received byte chunks with blocking, timed pops.
///
/// # Thread Safety
///
/// `InboundQueue` is `Send + Sync`. One producer (the bridge worker) and any
/// number of consumers may use it concurrently.
#[derive(Debug, Default)]
pub struct InboundQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl InboundQueue {
    /// Creates an empty, open queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and wakes waiting readers. Empty chunks are ignored.
    pub fn push(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        state.buffered += chunk.len();
        state.chunks.push_back(chunk);
        drop(state);
        self.ready.notify_all();
    }

    /// Marks the producer side finished and wakes waiting readers.
    ///
    /// Buffered chunks remain readable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered bytes.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state.lock().buffered
    }

    /// Waits up to `timeout` for data, then returns up to `max` bytes.
    ///
    /// Returns an empty vector if nothing arrived in time, or if `max` is
    /// zero.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the queue is closed and drained.
    pub fn pop(&self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        self.wait_while(&mut state, timeout, |s| s.chunks.is_empty());

        if state.chunks.is_empty() {
            return if state.closed {
                Err(Error::ConnectionClosed)
            } else {
                Ok(Vec::new())
            };
        }

        Ok(state.take(max))
    }

    /// Waits up to `timeout` for a full line (ending in `\n`).
    ///
    /// On timeout or close, returns whatever partial line is buffered.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the queue is closed and drained.
    pub fn pop_line(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if let Some(line) = state.take_line() {
                return Ok(line);
            }
            if state.closed {
                break;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }

        if state.closed && state.chunks.is_empty() {
            return Err(Error::ConnectionClosed);
        }

        let len = state.buffered;
        Ok(state.take_exact(len))
    }

    /// Blocks while `condition` holds, the queue is open, and time remains.
    fn wait_while(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        timeout: Duration,
        condition: impl Fn(&QueueState) -> bool,
    ) {
        let deadline = Instant::now().checked_add(timeout);

        while condition(&**state) && !state.closed {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(state),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
