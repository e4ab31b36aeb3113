//! Wire markers understood by the device firmware.
//!
//! These are fixed, case-sensitive tokens. They are not versioned.

/// Event/segment delimiter in device output.
pub const EVENT: &str = "^^";

/// Start of a script transfer.
pub const START: &str = "^^s";

/// End of transfer, store the script only.
pub const STORE: &str = "^^w";

/// End of transfer, store and execute the script.
pub const EXECUTE: &str = "^^e";

/// Transfer terminator, sent last.
pub const END: &str = "^^z";

/// Ask the device to print its stored script.
pub const PRINT: &str = "^^p";

/// Terminator appended to every transmitted line.
pub const LINE_TERMINATOR: &str = "\r\n";
