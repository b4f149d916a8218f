// =============================================================================
// MinimalOS NextGen — Sleeping Synchronization Primitives
// =============================================================================
//
// Primitives that block the caller instead of spinning. All of them are
// built on the scheduler's resource queues and take the atomic bracket
// around every state change.
//
// Lock ordering:
//   Condition waiter list  →  Scheduler tables
//   Alarm sleep queue      →  Substrate run set
//
// No spin lock is ever held across `Machine::sleep`.
// =============================================================================

pub mod condvar;
pub mod join;
pub mod lock;

pub use condvar::Condition;
pub use join::Join;
pub use lock::Lock;
