//! Device output tokenizer.
//!
//! Device output arrives as a byte stream. [`LineSplitter`] cuts it into
//! lines and [`tokenize_line`] turns each line into [`Token`]s.
//!
//! # Line Format
//!
//! ```text
//! ^^stream(1,4.2)^^change(2,1)      two structured events
//! hello from lua                    plain output
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use super::marker;

// ============================================================================
// DeviceEvent
// ============================================================================

/// A structured event parsed from one device line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEvent {
    /// The full line the event was parsed from.
    pub line: String,
    /// Event name (text before the first `(`).
    pub name: String,
    /// Comma-separated arguments, in order.
    pub args: Vec<String>,
}

impl DeviceEvent {
    /// Creates a new device event.
    #[must_use]
    pub fn new(
        line: impl Into<String>,
        name: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            line: line.into(),
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Token
// ============================================================================

/// One tokenized unit of device output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A `name(args)` segment.
    Event(DeviceEvent),
    /// A plain line with no markers.
    Output(String),
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Tokenizes a single line of device output.
///
/// Lines containing the event marker produce one [`Token::Event`] per
/// non-empty segment. Other non-empty lines produce a single
/// [`Token::Output`]. Empty lines produce nothing.
#[must_use]
pub fn tokenize_line(line: &str) -> Vec<Token> {
    if line.contains(marker::EVENT) {
        return line
            .split(marker::EVENT)
            .filter_map(|segment| parse_segment(line, segment))
            .map(Token::Event)
            .collect();
    }

    if line.is_empty() {
        Vec::new()
    } else {
        vec![Token::Output(line.to_owned())]
    }
}

/// Parses one `name(a,b)` segment.
///
/// Returns `None` when both the name and the argument text are empty.
fn parse_segment(line: &str, segment: &str) -> Option<DeviceEvent> {
    let segment = segment.trim_end();
    let (name, rest) = segment.split_once('(').unwrap_or((segment, ""));
    let name = name.trim();

    if name.is_empty() && rest.is_empty() {
        return None;
    }

    let rest = rest.strip_suffix(')').unwrap_or(rest);
    Some(DeviceEvent::new(line, name, rest.split(',')))
}

// ============================================================================
// LineSplitter
// ============================================================================

/// Longest partial line held before it is emitted without a terminator.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Accumulates inbound bytes and yields complete lines.
///
/// Lines end at `\n`; surrounding `\r` is stripped so both `\r\n` and
/// `\n\r` terminated output split cleanly. A trailing partial line stays
/// buffered until more data arrives, [`flush`](Self::flush) is called, or it
/// grows past [`MAX_PENDING_BYTES`].
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    /// Creates an empty splitter.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = match self.buffer.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => {
                let rest = self.buffer.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.buffer, rest);

                // `complete` ends with the newline found above.
                complete[..last_newline]
                    .split(|&b| b == b'\n')
                    .map(decode_line)
                    .collect()
            }
            None => Vec::new(),
        };

        if self.buffer.len() > MAX_PENDING_BYTES {
            lines.extend(self.flush());
        }
        lines
    }

    /// Takes the partial line, if any, as a line of its own.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(decode_line(&raw))
    }

    /// Number of bytes held in the partial line.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_matches('\r').to_owned()
}

// ============================================================================
// Tests
// ============================================================================
