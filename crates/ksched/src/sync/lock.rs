//! Sleeping lock with priority donation.
//!
//! Unlike a spinlock, a contended `Lock` parks the caller on a resource
//! queue and gives up the CPU. The queue donates, so while a high-priority
//! thread waits the holder runs at that priority (or holds those tickets).
//! Ownership is handed directly from the releasing thread to the chosen
//! waiter; the holder *is* the queue owner.

use crate::machine::{Machine, ThreadId};
use crate::task::queue::QueueId;
use crate::task::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lock {
    queue: QueueId,
}

impl Lock {
    pub fn new<M: Machine>(sched: &Scheduler<M>) -> Self {
        Self {
            queue: sched.new_queue(true),
        }
    }

    /// Take the lock, sleeping until it is handed over if it is held.
    ///
    /// # Panics
    /// If the caller already holds it.
    pub fn acquire<M: Machine>(&self, sched: &Scheduler<M>) {
        let _irq = sched.bracket();
        let me = sched.current_thread();
        let holder = sched.owner(self.queue);
        assert!(holder != Some(me), "{me} acquires a lock it already holds");

        if holder.is_none() {
            sched.acquire(self.queue, me);
            return;
        }

        log::trace!("[lock] {me} blocks on {}", self.queue);
        sched.wait_for_access(self.queue, me);
        sched.machine().sleep();
        debug_assert_eq!(sched.owner(self.queue), Some(me));
    }

    /// Hand the lock to the best waiter, or leave it free.
    ///
    /// # Panics
    /// If the caller does not hold it.
    pub fn release<M: Machine>(&self, sched: &Scheduler<M>) {
        let _irq = sched.bracket();
        let me = sched.current_thread();
        assert!(
            sched.owner(self.queue) == Some(me),
            "{me} releases a lock it does not hold"
        );
        if let Some(next) = sched.next_thread(self.queue) {
            log::debug!("[lock] {me} hands {} to {next}", self.queue);
            sched.machine().ready(next);
        }
    }

    pub fn is_held_by_current_thread<M: Machine>(&self, sched: &Scheduler<M>) -> bool {
        sched.owner(self.queue) == Some(sched.current_thread())
    }

    pub fn holder<M: Machine>(&self, sched: &Scheduler<M>) -> Option<ThreadId> {
        sched.owner(self.queue)
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedConfig;
    use crate::sim::SimMachine;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    type Sched = Arc<Scheduler<Arc<SimMachine>>>;

    fn setup() -> (Arc<SimMachine>, Sched) {
        let machine = SimMachine::new();
        let sched = Arc::new(Scheduler::new(Arc::clone(&machine), SchedConfig::new()));
        (machine, sched)
    }

    fn set_own_priority(sched: &Sched, priority: i32) {
        let _irq = sched.bracket();
        sched.set_priority(sched.current_thread(), priority);
    }

    #[test]
    fn uncontended_acquire_and_release() {
        let (machine, sched) = setup();
        let lock = Lock::new(&sched);
        let s = Arc::clone(&sched);
        let id = machine.spawn("solo", move || {
            lock.acquire(&s);
            assert!(lock.is_held_by_current_thread(&s));
            lock.release(&s);
            assert_eq!(lock.holder(&s), None);
        });
        machine.run();
        assert_eq!(machine.status(id), Some(crate::sim::SimStatus::Finished));
    }

    #[test]
    fn holder_inherits_waiter_priority() {
        let (machine, sched) = setup();
        let lock = Lock::new(&sched);
        let seen = Arc::new(spin::Mutex::new(Vec::new()));

        let (s, w) = (Arc::clone(&sched), Arc::clone(&seen));
        let low = machine.spawn("low", move || {
            lock.acquire(&s);
            s.machine().yield_now(); // let `high` block on the lock
            {
                let _irq = s.bracket();
                let me = s.current_thread();
                w.lock().push(("low boosted", s.get_effective_priority(me)));
            }
            lock.release(&s);
            let _irq = s.bracket();
            let me = s.current_thread();
            w.lock().push(("low restored", s.get_effective_priority(me)));
        });

        let (s, w) = (Arc::clone(&sched), Arc::clone(&seen));
        machine.spawn("high", move || {
            set_own_priority(&s, 6);
            lock.acquire(&s);
            w.lock().push(("high holds", i32::from(lock.is_held_by_current_thread(&s))));
            lock.release(&s);
        });

        machine.run();
        assert_eq!(
            *seen.lock(),
            [("low boosted", 6), ("low restored", 1), ("high holds", 1)]
        );
        let _irq = sched.bracket();
        assert_eq!(sched.get_effective_priority(low), 1);
    }

    #[test]
    fn release_hands_to_highest_priority_waiter() {
        let (machine, sched) = setup();
        let lock = Lock::new(&sched);
        let order = Arc::new(spin::Mutex::new(Vec::new()));

        let s = Arc::clone(&sched);
        machine.spawn("holder", move || {
            lock.acquire(&s);
            s.machine().yield_now();
            lock.release(&s);
        });
        for (name, priority) in [("p2", 2), ("p5", 5), ("p3", 3)] {
            let (s, o) = (Arc::clone(&sched), Arc::clone(&order));
            machine.spawn(name, move || {
                set_own_priority(&s, priority);
                lock.acquire(&s);
                o.lock().push(name);
                lock.release(&s);
            });
        }

        machine.run();
        assert_eq!(*order.lock(), ["p5", "p3", "p2"]);
    }

    #[test]
    #[should_panic(expected = "releases a lock it does not hold")]
    fn release_by_non_holder_is_fatal() {
        let (machine, sched) = setup();
        let lock = Lock::new(&sched);
        let s = Arc::clone(&sched);
        machine.spawn("intruder", move || lock.release(&s));
        machine.run();
    }

    #[test]
    #[should_panic(expected = "acquires a lock it already holds")]
    fn recursive_acquire_is_fatal() {
        let (machine, sched) = setup();
        let lock = Lock::new(&sched);
        let s = Arc::clone(&sched);
        machine.spawn("greedy", move || {
            lock.acquire(&s);
            lock.acquire(&s);
        });
        machine.run();
    }
}
