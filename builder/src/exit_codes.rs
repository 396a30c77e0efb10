//! Stable exit codes for builder CLI commands.

/// Command succeeded; for `builder run`, the session completed.
pub const OK: i32 = 0;
/// Invalid arguments, layout or config, or any other error.
pub const INVALID: i32 = 1;
/// `builder run` session failed (oracle unavailable or corrections exhausted).
pub const FAILED: i32 = 2;
/// `builder run` session aborted at the iteration budget.
pub const ABORTED: i32 = 3;
