//! Interactive shell commands.
//!
//! The terminal UI itself lives outside this crate. This module holds the
//! parts a front end needs: parsing an input line into a [`ShellCommand`],
//! running it against a [`Link`], and rendering events as text.
//!
//! # Commands
//!
//! | Input | Action |
//! |-------|--------|
//! | `u <file>` | Upload `<file>` and remember it |
//! | `u` | Upload the remembered file |
//! | `r <file>` | Upload and run `<file>`, and remember it |
//! | `p` | Print the stored script (`^^p`) |
//! | `h` | Show help |
//! | `q` | Quit |
//! | anything else | Sent to the device as a line |

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::events::{EventKind, HandlerTable, LinkEvent};
use crate::link::Link;
use crate::protocol::{DeviceEvent, marker};

// ============================================================================
// Constants
// ============================================================================

/// Shown when the shell starts.
pub const INTRO: &str = "  q to quit. h for help.\n\n";

/// Shown for `h`.
pub const HELP: &str = "
 h            this menu
 r <filename> upload and run <filename>
 u <filename> upload <filename>
 u            upload previous file
 p            print current script
 q            quit
";

/// Shown for `u` before any script was uploaded.
pub const UPLOAD_HINT: &str = "  u <filename> to upload script";

/// Shown on quit.
pub const GOODBYE: &str = "bye.";

// ============================================================================
// ShellCommand
// ============================================================================

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Upload the remembered script.
    UploadLast,
    /// Upload a script.
    Upload(PathBuf),
    /// Upload and run a script.
    Execute(PathBuf),
    /// Ask the device to print its stored script.
    PrintScript,
    /// Show help.
    Help,
    /// Leave the shell.
    Quit,
    /// Send the line to the device verbatim.
    Send(String),
}

impl ShellCommand {
    /// Parses one input line. Returns `None` for blank input.
    ///
    /// File commands only match existing files; otherwise the line is
    /// sent to the device as-is.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, Some(rest.trim())),
            None => (trimmed, None),
        };

        let command = match (word, rest) {
            ("u", None) => Self::UploadLast,
            ("u", Some(path)) if Path::new(path).is_file() => Self::Upload(path.into()),
            ("r", Some(path)) if Path::new(path).is_file() => Self::Execute(path.into()),
            ("p", None) => Self::PrintScript,
            ("h", None) => Self::Help,
            ("q", None) => Self::Quit,
            _ => Self::Send(line.to_owned()),
        };
        Some(command)
    }
}

// ============================================================================
// ShellReply
// ============================================================================

/// What the front end should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellReply {
    /// Nothing to show.
    Done,
    /// Show this text.
    Message(String),
    /// Exit the shell.
    Quit,
}

// ============================================================================
// ShellSession
// ============================================================================

/// Shell state that outlives single commands.
#[derive(Debug, Clone, Default)]
pub struct ShellSession {
    last_script: Option<PathBuf>,
}

impl ShellSession {
    /// Creates a session with no remembered script.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The script `u` would upload.
    #[inline]
    #[must_use]
    pub fn last_script(&self) -> Option<&Path> {
        self.last_script.as_deref()
    }

    /// Parses and runs one input line.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn handle_line(&mut self, link: &Link, line: &str) -> Result<ShellReply> {
        match ShellCommand::parse(line) {
            Some(command) => self.run(link, command),
            None => Ok(ShellReply::Done),
        }
    }

    /// Runs a command against `link`.
    ///
    /// # Errors
    ///
    /// Whatever the link operation fails with.
    pub fn run(&mut self, link: &Link, command: ShellCommand) -> Result<ShellReply> {
        debug!(?command, "Shell command");

        match command {
            ShellCommand::UploadLast => match self.last_script.clone() {
                Some(path) => link.upload(path)?,
                None => return Ok(ShellReply::Message(UPLOAD_HINT.to_owned())),
            },
            ShellCommand::Upload(path) => {
                self.last_script = Some(path.clone());
                link.upload(path)?;
            }
            ShellCommand::Execute(path) => {
                self.last_script = Some(path.clone());
                link.execute(path)?;
            }
            ShellCommand::PrintScript => {
                link.write_line(marker::PRINT)?;
            }
            ShellCommand::Help => return Ok(ShellReply::Message(HELP.to_owned())),
            ShellCommand::Quit => return Ok(ShellReply::Quit),
            ShellCommand::Send(line) => {
                link.write_line(&line)?;
            }
        }

        Ok(ShellReply::Done)
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Renders an event the way the shell prints it.
#[must_use]
pub fn render_event(event: &LinkEvent) -> String {
    match event {
        LinkEvent::Connect => "  <device connected>\n".to_owned(),
        LinkEvent::ConnectErr { .. } | LinkEvent::Disconnect { .. } => {
            "  <device disconnected>\n".to_owned()
        }
        LinkEvent::Uploading { path } => format!("uploading {}\n", path.display()),
        LinkEvent::Running { path } => format!("running {}\n", path.display()),
        LinkEvent::Event(device) => render_device_event(device),
        LinkEvent::Output { line } => format!("{line}\n"),
    }
}

/// `stream` and `change` on inputs 1 and 2 get their own line format.
fn render_device_event(event: &DeviceEvent) -> String {
    if let ("stream" | "change", [channel, value]) = (event.name.as_str(), event.args.as_slice())
        && let Ok(channel @ 1..=2) = channel.trim().parse::<u8>()
    {
        return format!("\ninput[{channel}] = {value}\n");
    }
    format!("^^{}({})", event.name, event.args.join(", "))
}

/// A handler table that renders every event into `sink`.
#[must_use]
pub fn shell_handlers<F>(sink: F) -> HandlerTable
where
    F: Fn(String) + Send + Sync + 'static,
{
    let sink = Arc::new(sink);
    let mut table = HandlerTable::new();
    for kind in EventKind::ALL {
        let sink = Arc::clone(&sink);
        table.subscribe(kind, move |event| {
            sink(render_event(event));
            Ok(())
        });
    }
    table
}

// ============================================================================
// Tests
// ============================================================================
