// =============================================================================
// MinimalOS NextGen — Scheduling and Synchronization Core
// =============================================================================
//
// Everything the kernel needs to decide who runs next and to put threads
// to sleep and wake them up again:
//
//   task::scheduler   resource queues with transitive priority donation
//   task::lottery     ticket-weighted queue selection
//   task::alarm       tick-driven timed sleep
//   sync              sleeping lock, condition variable, join point
//
// The crate never touches hardware directly. It drives a `Machine`
// (current thread, yield, sleep, ready, finish, tick clock) and an
// `Interrupts` bracket supplied by its host: the kernel on bare metal
// (`arch`), or host threads under test (`sim`).
//
// All scheduling state lives in one `Scheduler` value that callers pass
// around; there is no global instance.
// =============================================================================

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod machine;
pub mod rng;
pub mod sync;
pub mod task;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::SchedConfig;
pub use error::{ConfigError, SchedError};
pub use machine::{Interrupts, IrqGuard, IrqState, Machine, ThreadId, Tick};
pub use sync::{Condition, Join, Lock};
pub use task::{Alarm, Policy, Priority, QueueId, Scheduler};
