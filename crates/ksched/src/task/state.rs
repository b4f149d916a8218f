//! Per-thread scheduling state.
//!
//! One `ThreadState` hangs off every thread the scheduler has seen. It is
//! created lazily the first time a thread touches a queue or has its
//! priority read or written, and dropped when the thread exits.

use alloc::vec::Vec;

use super::policy::Priority;
use super::queue::QueueId;

/// Scheduling metadata for one thread.
///
/// `cached` is the memoised effective weight. `None` means stale: the next
/// query recomputes it from `base` and the waiters of every owned queue.
#[derive(Debug, Clone)]
pub struct ThreadState {
    pub(crate) base: Priority,
    pub(crate) cached: Option<Priority>,
    /// Queues this thread currently owns (sources of incoming donation).
    pub(crate) owned: Vec<QueueId>,
    /// Logical stamp taken when the thread was last placed on a queue.
    pub(crate) enqueued_at: u64,
    /// The queue this thread is blocked on, if any.
    pub(crate) waiting_on: Option<QueueId>,
}

impl ThreadState {
    pub fn new(base: Priority) -> Self {
        Self {
            base,
            cached: None,
            owned: Vec::new(),
            enqueued_at: 0,
            waiting_on: None,
        }
    }

    pub fn base(&self) -> Priority {
        self.base
    }

    /// The memoised effective weight, if still valid.
    pub fn cached_effective(&self) -> Option<Priority> {
        self.cached
    }

    pub fn owned(&self) -> &[QueueId] {
        &self.owned
    }

    pub fn waiting_on(&self) -> Option<QueueId> {
        self.waiting_on
    }

    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    pub(crate) fn attach(&mut self, queue: QueueId) {
        if !self.owned.contains(&queue) {
            self.owned.push(queue);
        }
    }

    pub(crate) fn detach(&mut self, queue: QueueId) {
        self.owned.retain(|&owned| owned != queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_stale_and_owns_nothing() {
        let state = ThreadState::new(3);
        assert_eq!(state.base(), 3);
        assert_eq!(state.cached_effective(), None);
        assert!(state.owned().is_empty());
        assert_eq!(state.waiting_on(), None);
    }

    #[test]
    fn attach_is_idempotent_and_detach_removes() {
        let mut state = ThreadState::new(1);
        let q = QueueId::pack(0, 4);
        state.attach(q);
        state.attach(q);
        assert_eq!(state.owned(), &[q]);
        state.detach(q);
        assert!(state.owned().is_empty());
    }
}
