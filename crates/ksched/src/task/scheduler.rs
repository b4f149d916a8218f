//! The scheduler context object.
//!
//! `Scheduler<M>` owns every piece of scheduling state: the per-thread
//! table, the queue table, and the lottery generator. There is no global
//! instance; callers hold a reference and pass it to every lock, condition,
//! join point and alarm operation.
//!
//! Priority donation:
//!   A thread's effective priority is its base priority folded with the
//!   effective priority of every thread waiting on a donation-enabled queue
//!   it owns (max under the priority policy, saturating sum under lottery).
//!   The fold is recursive, so donation is transitive through chains of
//!   locks and joins. Results are memoised per thread and recomputed lazily
//!   on the next query after something invalidated them.
//!
//! Invalidation walks up the chain "thread → queue it waits on → that
//! queue's owner → …" clearing memoised values, so no owner keeps a stale
//! donated value. Ownership forms a forest (a thread waits on at most one
//! queue, a queue has one owner); a cycle is a caller bug and trips an
//! assertion.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use super::lottery;
use super::policy::{pick_highest, Candidate, Policy, Priority};
use super::queue::{QueueId, QueueState, QueueTable};
use super::state::ThreadState;
use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::machine::{IrqGuard, Machine, ThreadId};
use crate::rng::XorShift64;

// ── Tables ──────────────────────────────────────────────────────

/// All scheduling state. Every method assumes the caller is inside the
/// atomic bracket.
pub(crate) struct Tables {
    policy: Policy,
    threads: BTreeMap<ThreadId, ThreadState>,
    queues: QueueTable,
    /// Logical clock for enqueue stamps; strictly increasing.
    stamp: u64,
    rng: XorShift64,
}

impl Tables {
    pub(crate) fn new(policy: Policy, seed: u64) -> Self {
        Self {
            policy,
            threads: BTreeMap::new(),
            queues: QueueTable::new(),
            stamp: 0,
            rng: XorShift64::new(seed),
        }
    }

    /// State for `thread`, created on first use.
    fn state_mut(&mut self, thread: ThreadId) -> &mut ThreadState {
        let base = self.policy.default_weight();
        self.threads
            .entry(thread)
            .or_insert_with(|| ThreadState::new(base))
    }

    pub(crate) fn thread(&self, thread: ThreadId) -> Option<&ThreadState> {
        self.threads.get(&thread)
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn queue(&self, id: QueueId) -> &QueueState {
        match self.queues.get(id) {
            Some(queue) => queue,
            None => panic!("stale or unknown queue handle {id}"),
        }
    }

    fn queue_mut(&mut self, id: QueueId) -> &mut QueueState {
        match self.queues.get_mut(id) {
            Some(queue) => queue,
            None => panic!("stale or unknown queue handle {id}"),
        }
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.queues.len()
    }

    // ── Queue lifecycle ─────────────────────────────────────────

    pub(crate) fn new_queue(&mut self, donation: bool) -> QueueId {
        self.queues.insert(QueueState::new(self.policy, donation))
    }

    /// Retire a queue nobody waits on. A remaining owner is detached.
    pub(crate) fn close_queue(&mut self, id: QueueId) {
        let queue = self.queue(id);
        assert!(
            queue.is_empty(),
            "closing {id} while {} thread(s) still wait on it",
            queue.len()
        );
        if let Some(owner) = queue.owner {
            self.detach(owner, id);
        }
        self.queues.remove(id);
    }

    // ── Queue operations ────────────────────────────────────────

    /// Append `thread` to the waiters of `id`.
    pub(crate) fn wait_for_access(&mut self, id: QueueId, thread: ThreadId) {
        let queue = self.queue(id);
        assert!(
            queue.owner != Some(thread),
            "{thread} waits on {id}, which it already owns"
        );

        self.stamp += 1;
        let stamp = self.stamp;
        let state = self.state_mut(thread);
        if let Some(other) = state.waiting_on {
            panic!("{thread} waits on {id} while already waiting on {other}");
        }
        state.waiting_on = Some(id);
        state.enqueued_at = stamp;

        self.queue_mut(id).waiting.push_back(thread);
        self.invalidate(thread);
    }

    /// Make `thread` the owner of `id` without waiting.
    pub(crate) fn acquire(&mut self, id: QueueId, thread: ThreadId) {
        let queue = self.queue_mut(id);
        assert!(
            !queue.waiting.contains(&thread),
            "{thread} acquires {id} while waiting on it"
        );
        let previous = queue.owner.replace(thread);
        if let Some(previous) = previous.filter(|&p| p != thread) {
            self.detach(previous, id);
        }
        self.state_mut(thread).attach(id);
        self.invalidate(thread);
    }

    /// Hand `id` to the best waiter, or leave it unowned if nobody waits.
    pub(crate) fn next_thread(&mut self, id: QueueId) -> Option<ThreadId> {
        if let Some(previous) = self.queue_mut(id).owner.take() {
            self.detach(previous, id);
        }
        if self.queue(id).is_empty() {
            return None;
        }

        let winner = self.pick(id)?;
        let waiting = &mut self.queue_mut(id).waiting;
        let position = waiting.iter().position(|&t| t == winner)?;
        waiting.remove(position);
        self.state_mut(winner).waiting_on = None;
        self.acquire(id, winner);
        Some(winner)
    }

    fn pick(&mut self, id: QueueId) -> Option<ThreadId> {
        let (policy, donation) = {
            let queue = self.queue(id);
            (queue.policy, queue.donation)
        };
        let waiting: Vec<ThreadId> = self.queue(id).waiting().collect();

        let mut candidates = Vec::with_capacity(waiting.len());
        for thread in waiting {
            let weight = if donation {
                self.effective(thread)
            } else {
                self.state_mut(thread).base
            };
            let stamp = self.state_mut(thread).enqueued_at;
            candidates.push(Candidate {
                thread,
                weight,
                stamp,
            });
        }

        let index = match policy {
            Policy::Priority => pick_highest(&candidates),
            Policy::Lottery => lottery::draw(&candidates, &mut self.rng),
        }?;
        Some(candidates[index].thread)
    }

    fn detach(&mut self, owner: ThreadId, id: QueueId) {
        if let Some(state) = self.threads.get_mut(&owner) {
            state.detach(id);
        }
        self.invalidate(owner);
    }

    // ── Priorities ──────────────────────────────────────────────

    pub(crate) fn priority(&mut self, thread: ThreadId) -> Priority {
        self.state_mut(thread).base
    }

    /// Clamp and store a new base priority. No-op if unchanged.
    pub(crate) fn set_priority(&mut self, thread: ThreadId, priority: Priority) {
        let priority = self.policy.clamp(priority);
        let state = self.state_mut(thread);
        if state.base == priority {
            return;
        }
        state.base = priority;
        self.invalidate(thread);
    }

    pub(crate) fn effective(&mut self, thread: ThreadId) -> Priority {
        self.effective_at(thread, 0)
    }

    fn effective_at(&mut self, thread: ThreadId, depth: usize) -> Priority {
        assert!(
            depth <= self.threads.len(),
            "ownership cycle: donation through {thread} does not terminate"
        );

        let state = self.state_mut(thread);
        if let Some(cached) = state.cached {
            return cached;
        }
        let mut effective = state.base;

        let mut owned = 0;
        while let Some(id) = self.threads[&thread].owned.get(owned).copied() {
            owned += 1;
            let queue = self.queue(id);
            if !queue.donation {
                continue;
            }
            let policy = queue.policy;

            let mut waiter = 0;
            while let Some(donor) = self.queue(id).waiting.get(waiter).copied() {
                waiter += 1;
                let donated = self.effective_at(donor, depth + 1);
                effective = policy.donate(effective, donated);
            }
        }

        self.state_mut(thread).cached = Some(effective);
        effective
    }

    /// Clear the memoised effective priority of `thread` and of every
    /// owner it transitively donates to.
    fn invalidate(&mut self, thread: ThreadId) {
        let mut next = Some(thread);
        let mut hops = 0;
        while let Some(current) = next {
            assert!(
                hops <= self.threads.len(),
                "ownership cycle: invalidation through {current} does not terminate"
            );
            hops += 1;

            let Some(state) = self.threads.get_mut(&current) else {
                break;
            };
            state.cached = None;
            next = state
                .waiting_on
                .and_then(|id| self.queues.get(id))
                .filter(|queue| queue.donation)
                .and_then(|queue| queue.owner);
        }
    }

    // ── Thread teardown ─────────────────────────────────────────

    /// Forget `thread`: withdraw it from the queue it waits on and release
    /// every queue it owns.
    pub(crate) fn exit_thread(&mut self, thread: ThreadId) {
        let Some(state) = self.threads.remove(&thread) else {
            return;
        };

        if let Some(id) = state.waiting_on {
            let mut donee = None;
            if let Some(queue) = self.queues.get_mut(id) {
                queue.waiting.retain(|&waiter| waiter != thread);
                if queue.donation {
                    donee = queue.owner;
                }
            }
            if let Some(owner) = donee {
                self.invalidate(owner);
            }
        }

        for id in state.owned {
            if let Some(queue) = self.queues.get_mut(id) {
                if queue.owner == Some(thread) {
                    queue.owner = None;
                }
            }
        }
    }
}

// ── Scheduler ───────────────────────────────────────────────────

/// Priority/lottery scheduler bound to one machine.
///
/// Methods documented as requiring the atomic bracket assert that
/// interrupts are disabled; the rest take the bracket themselves.
pub struct Scheduler<M: Machine> {
    machine: M,
    config: SchedConfig,
    tables: Mutex<Tables>,
}

impl<M: Machine> Scheduler<M> {
    pub fn new(machine: M, config: SchedConfig) -> Self {
        log::debug!("[sched] {} scheduler online", config.policy);
        Self {
            machine,
            config,
            tables: Mutex::new(Tables::new(config.policy, config.lottery_seed)),
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn config(&self) -> SchedConfig {
        self.config
    }

    /// Policy tag given to every queue this scheduler creates.
    pub fn policy(&self) -> Policy {
        self.config.policy
    }

    /// Enter the atomic bracket; it is left when the guard drops.
    pub fn bracket(&self) -> IrqGuard<'_, M> {
        IrqGuard::new(&self.machine)
    }

    pub fn current_thread(&self) -> ThreadId {
        self.machine.current_thread()
    }

    #[track_caller]
    fn assert_atomic(&self, operation: &str) {
        assert!(
            !self.machine.interrupts_enabled(),
            "{operation} requires interrupts disabled"
        );
    }

    // ── Queue factory and operations ────────────────────────────

    /// Allocate a resource queue. With `donation`, waiters donate their
    /// weight to the owner.
    pub fn new_queue(&self, donation: bool) -> QueueId {
        let _irq = self.bracket();
        let id = self.tables.lock().new_queue(donation);
        log::trace!("[sched] new {} queue {id} (donation={donation})", self.policy());
        id
    }

    /// Retire an idle queue. Its handle becomes stale.
    pub fn close_queue(&self, queue: QueueId) {
        let _irq = self.bracket();
        self.tables.lock().close_queue(queue);
    }

    /// Enqueue `thread` as a waiter. Requires the atomic bracket.
    #[track_caller]
    pub fn wait_for_access(&self, queue: QueueId, thread: ThreadId) {
        self.assert_atomic("wait_for_access");
        self.tables.lock().wait_for_access(queue, thread);
        log::trace!("[sched] {thread} waits on {queue}");
    }

    /// Give `thread` ownership of a free queue. Requires the atomic bracket.
    #[track_caller]
    pub fn acquire(&self, queue: QueueId, thread: ThreadId) {
        self.assert_atomic("acquire");
        self.tables.lock().acquire(queue, thread);
        log::trace!("[sched] {thread} owns {queue}");
    }

    /// Pass ownership to the next waiter and return it, or clear the owner
    /// and return `None` if nobody waits.
    pub fn next_thread(&self, queue: QueueId) -> Option<ThreadId> {
        let _irq = self.bracket();
        let next = self.tables.lock().next_thread(queue);
        match next {
            Some(thread) => log::trace!("[sched] {queue} handed to {thread}"),
            None => log::trace!("[sched] {queue} now idle"),
        }
        next
    }

    pub fn is_empty(&self, queue: QueueId) -> bool {
        let _irq = self.bracket();
        self.tables.lock().queue(queue).is_empty()
    }

    pub fn owner(&self, queue: QueueId) -> Option<ThreadId> {
        let _irq = self.bracket();
        self.tables.lock().queue(queue).owner()
    }

    /// Number of threads waiting on `queue`.
    pub fn waiters(&self, queue: QueueId) -> usize {
        let _irq = self.bracket();
        self.tables.lock().queue(queue).len()
    }

    pub fn queue_count(&self) -> usize {
        let _irq = self.bracket();
        self.tables.lock().queue_count()
    }

    // ── Per-thread priority ─────────────────────────────────────

    /// Base priority of `thread`. Requires the atomic bracket.
    #[track_caller]
    pub fn get_priority(&self, thread: ThreadId) -> Priority {
        self.assert_atomic("get_priority");
        self.tables.lock().priority(thread)
    }

    /// Priority after donation. Requires the atomic bracket.
    #[track_caller]
    pub fn get_effective_priority(&self, thread: ThreadId) -> Priority {
        self.assert_atomic("get_effective_priority");
        self.tables.lock().effective(thread)
    }

    /// Set the base priority, clamping out-of-range values to the nearest
    /// bound. Requires the atomic bracket.
    #[track_caller]
    pub fn set_priority(&self, thread: ThreadId, priority: Priority) {
        self.assert_atomic("set_priority");
        self.tables.lock().set_priority(thread, priority);
    }

    /// Like [`set_priority`](Self::set_priority) but rejects out-of-range
    /// values instead of clamping them.
    #[track_caller]
    pub fn try_set_priority(&self, thread: ThreadId, priority: Priority) -> Result<(), SchedError> {
        self.assert_atomic("try_set_priority");
        let policy = self.policy();
        if !policy.contains(priority) {
            return Err(SchedError::PriorityOutOfRange {
                requested: priority,
                minimum: policy.minimum(),
                maximum: policy.maximum(),
            });
        }
        self.tables.lock().set_priority(thread, priority);
        Ok(())
    }

    /// Raise the current thread's priority by one. `false` at the maximum.
    pub fn increase_priority(&self) -> bool {
        let _irq = self.bracket();
        let thread = self.current_thread();
        let mut tables = self.tables.lock();
        let priority = tables.priority(thread);
        if priority >= self.policy().maximum() {
            return false;
        }
        tables.set_priority(thread, priority + 1);
        true
    }

    /// Lower the current thread's priority by one. `false` at the minimum.
    pub fn decrease_priority(&self) -> bool {
        let _irq = self.bracket();
        let thread = self.current_thread();
        let mut tables = self.tables.lock();
        let priority = tables.priority(thread);
        if priority <= self.policy().minimum() {
            return false;
        }
        tables.set_priority(thread, priority - 1);
        true
    }

    // ── Thread lifecycle ────────────────────────────────────────

    /// Destroy the scheduling state of an exiting thread.
    ///
    /// Every exit path must come through here (or through
    /// [`finish`](Self::finish)); state of a thread that terminates behind
    /// the scheduler's back stays in the table for good.
    pub fn exit_thread(&self, thread: ThreadId) {
        let _irq = self.bracket();
        self.tables.lock().exit_thread(thread);
        log::trace!("[sched] {thread} state released");
    }

    /// Release the calling thread's scheduling state and terminate it.
    pub fn finish(&self) -> ! {
        let _irq = self.bracket();
        let thread = self.current_thread();
        self.tables.lock().exit_thread(thread);
        log::trace!("[sched] {thread} finished");
        self.machine.finish()
    }

    /// Number of threads with scheduling state attached.
    pub fn thread_count(&self) -> usize {
        let _irq = self.bracket();
        self.tables.lock().thread_count()
    }

    /// Whether `thread` currently has scheduling state attached.
    pub fn knows(&self, thread: ThreadId) -> bool {
        let _irq = self.bracket();
        self.tables.lock().thread(thread).is_some()
    }
}
