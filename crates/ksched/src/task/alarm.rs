//! Timed sleep — [073].
//!
//! Threads park here until the tick clock reaches their wake time. The
//! timer interrupt calls [`Alarm::on_tick`] once per tick; every record
//! whose wake tick has passed is moved to the run set in that same tick.

use alloc::collections::BinaryHeap;
use core::cmp::Reverse;
use spin::Mutex;

use super::scheduler::Scheduler;
use crate::machine::{Machine, ThreadId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SleepRecord {
    wake_at: Tick,
    /// Insertion order, so equal wake ticks leave in arrival order.
    seq: u64,
    thread: ThreadId,
}

/// Min-heap of sleepers keyed by wake tick.
#[derive(Debug, Default)]
pub struct SleepQueue {
    heap: BinaryHeap<Reverse<SleepRecord>>,
    seq: u64,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn insert(&mut self, wake_at: Tick, thread: ThreadId) {
        self.seq += 1;
        self.heap.push(Reverse(SleepRecord {
            wake_at,
            seq: self.seq,
            thread,
        }));
    }

    /// Remove and return the earliest sleeper if it is due at `now`.
    pub fn pop_due(&mut self, now: Tick) -> Option<ThreadId> {
        let Reverse(earliest) = self.heap.peek()?;
        if earliest.wake_at > now {
            return None;
        }
        self.heap.pop().map(|Reverse(record)| record.thread)
    }

    /// Earliest wake tick, if anyone sleeps.
    pub fn next_deadline(&self) -> Option<Tick> {
        self.heap.peek().map(|Reverse(record)| record.wake_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// The kernel alarm.
#[derive(Debug, Default)]
pub struct Alarm {
    sleepers: Mutex<SleepQueue>,
}

impl Alarm {
    pub const fn new() -> Self {
        Self {
            sleepers: Mutex::new(SleepQueue::new()),
        }
    }

    /// Timer interrupt handler.
    ///
    /// Yields the interrupted thread, then wakes every sleeper due at `now`.
    pub fn on_tick<M: Machine>(&self, sched: &Scheduler<M>, now: Tick) {
        sched.machine().yield_now();

        let _irq = sched.bracket();
        let mut sleepers = self.sleepers.lock();
        while let Some(thread) = sleepers.pop_due(now) {
            log::trace!("[alarm] tick {now}: waking {thread}");
            sched.machine().ready(thread);
        }
    }

    /// Block the current thread for at least `ticks` ticks.
    ///
    /// The thread becomes ready on the first tick at which the clock reads
    /// `now + ticks` or later. Non-positive durations return at once.
    pub fn wait_until<M: Machine>(&self, sched: &Scheduler<M>, ticks: i64) {
        if ticks <= 0 {
            return;
        }

        let _irq = sched.bracket();
        let machine = sched.machine();
        let thread = machine.current_thread();
        let wake_at = machine.now().saturating_add(ticks.unsigned_abs());
        self.sleepers.lock().insert(wake_at, thread);
        log::trace!("[alarm] {thread} sleeps until tick {wake_at}");
        machine.sleep();
    }

    /// Number of threads asleep.
    pub fn pending<M: Machine>(&self, sched: &Scheduler<M>) -> usize {
        let _irq = sched.bracket();
        self.sleepers.lock().len()
    }

    /// Earliest wake tick among the sleepers.
    pub fn next_deadline<M: Machine>(&self, sched: &Scheduler<M>) -> Option<Tick> {
        let _irq = sched.bracket();
        self.sleepers.lock().next_deadline()
    }
}
