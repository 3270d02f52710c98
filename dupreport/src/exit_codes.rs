//! Stable exit codes for dupreport CLI commands.

/// The run completed and the artifact was written.
pub const OK: i32 = 0;
/// A pipeline stage failed (missing tool, transform error, viewer error, ...).
pub const FAILURE: i32 = 1;
/// Settings, config or command-line input were invalid.
pub const INVALID: i32 = 2;
/// The analyzer exited non-zero while `fail_on_nonzero_exit` is set.
pub const TOOL_FAILED: i32 = 3;
/// The run was interrupted with Ctrl-C.
pub const CANCELLED: i32 = 130;
