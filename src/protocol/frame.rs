//! Script transfer framing.
//!
//! A transfer is planned as a list of [`TransferStep`]s and executed by the
//! link. Planning is pure so the exact wire sequence can be checked without
//! a device.
//!
//! # Sequence
//!
//! ```text
//! ^^s            start
//!   (settle)
//! line 1         one write per source line
//!   (line)
//! ...
//!   (settle)
//! ^^w | ^^e      store, or store and run
//!   (settle)
//! ^^z            end
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;

use super::marker;

// ============================================================================
// Constants
// ============================================================================

/// Delay between payload lines, for the device input buffer.
const DEFAULT_LINE_DELAY: Duration = Duration::from_millis(1);

/// Delay around control markers.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// TransferMode
// ============================================================================

/// What the device does with a transferred script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Store the script only.
    Store,
    /// Store the script and run it.
    Execute,
}

impl TransferMode {
    /// The marker that closes the payload for this mode.
    #[inline]
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Store => marker::STORE,
            Self::Execute => marker::EXECUTE,
        }
    }
}

// ============================================================================
// TransferStep
// ============================================================================

/// Kind of pause inside a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// After each payload line.
    Line,
    /// Around control markers.
    Settle,
}

/// One step of a planned transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStep {
    /// Send the text as one terminated line.
    Send(String),
    /// Wait before the next step.
    Pause(Pause),
}

// ============================================================================
// Pacing
// ============================================================================

/// Concrete delays for [`Pause`] kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Delay after each payload line.
    pub line: Duration,
    /// Delay around control markers.
    pub settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            line: DEFAULT_LINE_DELAY,
            settle: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl Pacing {
    /// No delays at all. Useful against fast peers and in tests.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self {
            line: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }

    /// Returns the delay for a pause kind.
    #[inline]
    #[must_use]
    pub const fn delay(&self, pause: Pause) -> Duration {
        match pause {
            Pause::Line => self.line,
            Pause::Settle => self.settle,
        }
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Plans the transfer of `lines` in the given mode.
///
/// Trailing whitespace (including any `\r`) is stripped from each line;
/// the link appends the wire terminator when sending.
#[must_use]
pub fn transfer_plan<I, S>(lines: I, mode: TransferMode) -> Vec<TransferStep>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut steps = vec![
        TransferStep::Send(marker::START.to_owned()),
        TransferStep::Pause(Pause::Settle),
    ];

    for line in lines {
        steps.push(TransferStep::Send(line.as_ref().trim_end().to_owned()));
        steps.push(TransferStep::Pause(Pause::Line));
    }

    steps.extend([
        TransferStep::Pause(Pause::Settle),
        TransferStep::Send(mode.marker().to_owned()),
        TransferStep::Pause(Pause::Settle),
        TransferStep::Send(marker::END.to_owned()),
    ]);

    steps
}

// ============================================================================
// Tests
// ============================================================================
