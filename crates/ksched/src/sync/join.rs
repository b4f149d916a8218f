//! Join points.
//!
//! A `Join` is created when a thread is forked and is owned by that thread
//! until it exits. A joiner waits on the join's donating queue, so the
//! target runs with the joiner's priority while it is being waited for.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::machine::{Machine, ThreadId};
use crate::task::queue::QueueId;
use crate::task::scheduler::Scheduler;

#[derive(Debug)]
pub struct Join {
    queue: QueueId,
    target: ThreadId,
    done: AtomicBool,
    joined: AtomicBool,
}

impl Join {
    /// Create the join point of `target`, which owns it from now on.
    pub fn new<M: Machine>(sched: &Scheduler<M>, target: ThreadId) -> Self {
        let queue = sched.new_queue(true);
        {
            let _irq = sched.bracket();
            sched.acquire(queue, target);
        }
        Self {
            queue,
            target,
            done: AtomicBool::new(false),
            joined: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> ThreadId {
        self.target
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Block until the target has exited.
    ///
    /// # Panics
    /// If the target joins itself, or the target is joined a second time.
    pub fn join<M: Machine>(&self, sched: &Scheduler<M>) {
        let me = sched.current_thread();
        assert!(me != self.target, "{me} joins itself");
        assert!(
            !self.joined.swap(true, Ordering::AcqRel),
            "{} joined more than once",
            self.target
        );

        let _irq = sched.bracket();
        if self.is_done() {
            return;
        }
        log::trace!("[join] {me} waits for {}", self.target);
        sched.wait_for_access(self.queue, me);
        sched.machine().sleep();
    }

    /// Terminate the target: wake the joiner, drop the target's scheduling
    /// state and retire the join queue. Never returns.
    pub fn exit<M: Machine>(&self, sched: &Scheduler<M>) -> ! {
        assert!(
            sched.current_thread() == self.target,
            "{} exits through the join point of {}",
            sched.current_thread(),
            self.target
        );

        let _irq = sched.bracket();
        self.done.store(true, Ordering::Release);
        if let Some(joiner) = sched.next_thread(self.queue) {
            sched.machine().ready(joiner);
        }
        sched.close_queue(self.queue);
        log::debug!("[join] {} exited", self.target);
        sched.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedConfig;
    use crate::sim::{SimMachine, SimStatus};
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use std::sync::OnceLock;

    type Sched = Arc<Scheduler<Arc<SimMachine>>>;

    fn setup() -> (Arc<SimMachine>, Sched) {
        let machine = SimMachine::new();
        let sched = Arc::new(Scheduler::new(Arc::clone(&machine), SchedConfig::new()));
        (machine, sched)
    }

    #[test]
    fn joiner_blocks_until_target_exits_and_donates() {
        let (machine, sched) = setup();
        let log = Arc::new(spin::Mutex::new(Vec::new()));
        let slot: Arc<OnceLock<Join>> = Arc::new(OnceLock::new());

        let (s, l, j) = (Arc::clone(&sched), Arc::clone(&log), Arc::clone(&slot));
        machine.spawn("parent", move || {
            {
                let _irq = s.bracket();
                s.set_priority(s.current_thread(), 5);
            }

            let (cs, cl, cj) = (Arc::clone(&s), Arc::clone(&l), Arc::clone(&j));
            let child = s.machine().spawn("child", move || {
                let me = cs.current_thread();
                let boosted = {
                    let _irq = cs.bracket();
                    cs.get_effective_priority(me)
                };
                cl.lock().push(("child runs at", boosted));
                if let Some(join) = cj.get() {
                    join.exit(&cs);
                }
            });
            let join = j.get_or_init(|| Join::new(&s, child));

            join.join(&s);
            l.lock().push(("parent resumes", 0));
            assert!(join.is_done());
            assert!(!s.knows(child));
        });

        machine.run();
        assert_eq!(*log.lock(), [("child runs at", 5), ("parent resumes", 0)]);
        assert_eq!(sched.queue_count(), 0);
    }

    #[test]
    fn join_after_exit_returns_immediately() {
        let (machine, sched) = setup();
        let slot: Arc<OnceLock<Join>> = Arc::new(OnceLock::new());

        let (s, j) = (Arc::clone(&sched), Arc::clone(&slot));
        let parent = machine.spawn("parent", move || {
            let (cs, cj) = (Arc::clone(&s), Arc::clone(&j));
            let child = s.machine().spawn("child", move || {
                if let Some(join) = cj.get() {
                    join.exit(&cs);
                }
            });
            let join = j.get_or_init(|| Join::new(&s, child));
            s.machine().yield_now(); // child runs to completion
            assert!(join.is_done());
            join.join(&s);
        });

        machine.run();
        assert_eq!(machine.status(parent), Some(SimStatus::Finished));
    }

    #[test]
    #[should_panic(expected = "joins itself")]
    fn self_join_is_fatal() {
        let (machine, sched) = setup();
        let s = Arc::clone(&sched);
        machine.spawn("narcissist", move || {
            let join = Join::new(&s, s.current_thread());
            join.join(&s);
        });
        machine.run();
    }
}
