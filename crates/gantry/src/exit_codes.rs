//! Exit codes for the CLI

#![allow(dead_code)]

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Workspace discovery error
pub const DISCOVERY_ERROR: i32 = 3;

/// Task resolution error
pub const RESOLVE_ERROR: i32 = 4;

/// One or more tasks failed
pub const TASK_FAILED: i32 = 5;

/// User cancelled
pub const CANCELLED: i32 = 130;
