//! Scheduling core: resource queues, priority donation, lottery draws and
//! the tick-driven alarm.

pub mod alarm;
pub mod lottery;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod state;

pub use alarm::{Alarm, SleepQueue};
pub use policy::{Policy, Priority};
pub use queue::{QueueId, QueueState};
pub use scheduler::Scheduler;
pub use state::ThreadState;
