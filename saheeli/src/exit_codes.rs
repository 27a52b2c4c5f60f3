//! Stable exit codes for `saheeli` commands.

/// Command succeeded; every submitted task completed.
pub const OK: i32 = 0;
/// Invalid config, failed image build, aborted agent loop, or any other error.
pub const INVALID: i32 = 1;
/// `saheeli submit` finished but at least one task ended Incomplete.
pub const INCOMPLETE: i32 = 2;
