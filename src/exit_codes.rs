//! Exit code constants for the label-mutex CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid configuration)
//! - 2: Malformed event payload
//! - 3: Lock store failure (unreachable store, deadline exceeded)
//! - 4: Lock failure (not the holder, confirm lost, invariant violated)
//! - 5: Label mutation failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// The inbound event could not be parsed; nothing was mutated.
pub const EVENT_FAILURE: i32 = 2;

/// The lock store could not be reached or kept failing until the deadline.
pub const BACKEND_FAILURE: i32 = 3;

/// The lock could not be released or confirmed for the given token.
pub const LOCK_FAILURE: i32 = 4;

/// One or more label mutations failed after the lock state was settled.
pub const LABEL_FAILURE: i32 = 5;
