//! Condition variables.
//!
//! A `Condition` is bound to one [`Lock`] and every operation requires the
//! caller to hold it. Waiters are woken in arrival order. A woken thread
//! has to win the lock again before `wait` returns, and another thread may
//! get there first, so the awaited predicate must be re-checked in a loop
//! ([`Condition::wait_while`] does this).

use alloc::collections::VecDeque;
use spin::Mutex;

use super::lock::Lock;
use crate::machine::{Machine, ThreadId};
use crate::task::scheduler::Scheduler;

#[derive(Debug)]
pub struct Condition {
    lock: Lock,
    waiters: Mutex<VecDeque<ThreadId>>,
}

impl Condition {
    pub const fn new(lock: Lock) -> Self {
        Self {
            lock,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub fn lock(&self) -> Lock {
        self.lock
    }

    #[track_caller]
    fn assert_held<M: Machine>(&self, sched: &Scheduler<M>, operation: &str) {
        assert!(
            self.lock.is_held_by_current_thread(sched),
            "condition {operation} without holding its lock"
        );
    }

    /// Release the lock, sleep until signalled, then reacquire the lock.
    pub fn wait<M: Machine>(&self, sched: &Scheduler<M>) {
        self.assert_held(sched, "wait");
        {
            let _irq = sched.bracket();
            self.waiters.lock().push_back(sched.current_thread());
            self.lock.release(sched);
            sched.machine().sleep();
        }
        self.lock.acquire(sched);
    }

    /// Wait for as long as `condition` holds, re-checking after each wakeup.
    pub fn wait_while<M, F>(&self, sched: &Scheduler<M>, mut condition: F)
    where
        M: Machine,
        F: FnMut() -> bool,
    {
        while condition() {
            self.wait(sched);
        }
    }

    /// Wake the longest waiter, if any.
    pub fn signal<M: Machine>(&self, sched: &Scheduler<M>) {
        self.assert_held(sched, "signal");
        let _irq = sched.bracket();
        if let Some(thread) = self.waiters.lock().pop_front() {
            sched.machine().ready(thread);
        }
    }

    /// Wake every waiter.
    pub fn broadcast<M: Machine>(&self, sched: &Scheduler<M>) {
        self.assert_held(sched, "broadcast");
        let _irq = sched.bracket();
        let mut waiters = self.waiters.lock();
        while let Some(thread) = waiters.pop_front() {
            sched.machine().ready(thread);
        }
    }

    /// Number of threads waiting to be signalled.
    pub fn waiters<M: Machine>(&self, sched: &Scheduler<M>) -> usize {
        let _irq = sched.bracket();
        self.waiters.lock().len()
    }
}
