//! Stable exit codes for `actions` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, rule document, state document, or arguments.
pub const INVALID: i32 = 1;
/// `actions dispatch` aborted: an update failed or a ceiling was reached.
pub const DISPATCH_FAILED: i32 = 2;
