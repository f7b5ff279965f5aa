//! Stable exit codes for devloop CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid layout, config or plan, or any other error.
pub const INVALID: i32 = 1;
/// `devloop cycle` found every feature already complete.
pub const COMPLETE: i32 = 2;
/// A task aborted the cycle.
pub const ABORTED: i32 = 3;
/// Incomplete features remain but none can be scheduled.
pub const BLOCKED: i32 = 4;
/// Another cycle holds the gate.
pub const BUSY: i32 = 5;
