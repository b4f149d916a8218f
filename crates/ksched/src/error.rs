//! Recoverable errors.
//!
//! Contract violations (wrong thread, interrupts enabled, stale handles)
//! are not here: those are kernel bugs and panic on the spot.

use alloc::string::String;

use crate::task::policy::Priority;

/// Rejected scheduling request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// A strict priority update asked for a value outside the policy's range.
    #[error("priority {requested} is outside [{minimum}, {maximum}]")]
    PriorityOutOfRange {
        requested: Priority,
        minimum: Priority,
        maximum: Priority,
    },
}

/// Malformed scheduler argument on the kernel command line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown scheduler policy `{0}`")]
    UnknownPolicy(String),
    #[error("invalid lottery seed `{0}`")]
    InvalidSeed(String),
}
