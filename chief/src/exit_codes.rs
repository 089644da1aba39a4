//! Stable exit codes for chief CLI commands.

/// The run completed (or the command succeeded).
pub const OK: i32 = 0;
/// Invalid plan/config/arguments or any other error.
pub const INVALID: i32 = 1;
/// `chief run` hit the iteration limit with work remaining.
pub const MAX_ITERATIONS: i32 = 2;
/// `chief run` failed (agent launch, abnormal exit, stream error).
pub const FAILED: i32 = 3;
/// `chief run` was cancelled.
pub const CANCELLED: i32 = 4;
