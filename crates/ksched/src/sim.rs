// =============================================================================
// MinimalOS NextGen — Hosted Execution Substrate
// =============================================================================
//
// Runs kernel threads on host threads so the blocking primitives can be
// exercised without booting the kernel.
//
// BATON:
//   Exactly one context holds the CPU at a time. `running` names it; `None`
//   means the driver (the host thread that called `run`). A kernel thread
//   that yields, sleeps or finishes hands the baton back to the driver,
//   which dispatches the next thread from a FIFO ready set.
//
// INTERRUPTS:
//   Every context carries its own interrupt flag, saved across switches the
//   way a real context switch saves RFLAGS. New threads start with
//   interrupts enabled, as does the driver.
//
// CLOCK:
//   Time only moves in `run_with_timer`. Whenever the ready set drains while
//   some thread is still blocked, the clock advances one tick and the timer
//   callback runs in driver context with interrupts disabled.
//
// PANICS:
//   A panic on a kernel thread is caught, the thread is retired, and the
//   payload is re-raised on the driver, so `#[should_panic]` works on
//   scenarios that violate a contract from inside a kernel thread.
//
// =============================================================================

use std::any::Any;
use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::machine::{Interrupts, IrqState, Machine, ThreadId, Tick};

/// Identity of the driver context.
pub const IDLE: ThreadId = ThreadId(0);

/// Default bound on consecutive ticks that wake nobody.
pub const DEFAULT_IDLE_LIMIT: u64 = 100_000;

thread_local! {
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Unwind payload used by [`Machine::finish`] to leave a thread body.
#[derive(Debug)]
pub struct ThreadExit;

/// Lifecycle of a simulated kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    Ready,
    Running,
    Blocked,
    Finished,
}

struct SimThread {
    status: SimStatus,
    irq: bool,
}

struct Inner {
    next_id: u64,
    threads: BTreeMap<ThreadId, SimThread>,
    ready: VecDeque<ThreadId>,
    running: Option<ThreadId>,
    driver_irq: bool,
    ticks: Tick,
    panic: Option<Box<dyn Any + Send>>,
}

impl Inner {
    fn irq_flag(&mut self, context: Option<ThreadId>) -> &mut bool {
        match context.and_then(|id| self.threads.get_mut(&id)) {
            Some(thread) => &mut thread.irq,
            None => &mut self.driver_irq,
        }
    }

    fn any_blocked(&self) -> bool {
        self.threads
            .values()
            .any(|thread| thread.status == SimStatus::Blocked)
    }
}

/// Single-CPU machine backed by host threads.
pub struct SimMachine {
    inner: Mutex<Inner>,
    turn: Condvar,
    idle_limit: u64,
}

impl SimMachine {
    pub fn new() -> Arc<Self> {
        Self::with_idle_limit(DEFAULT_IDLE_LIMIT)
    }

    /// A machine whose timer gives up after `idle_limit` consecutive ticks
    /// that wake nobody.
    pub fn with_idle_limit(idle_limit: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                next_id: IDLE.0 + 1,
                threads: BTreeMap::new(),
                ready: VecDeque::new(),
                running: None,
                driver_irq: true,
                ticks: 0,
                panic: None,
            }),
            turn: Condvar::new(),
            idle_limit,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context() -> Option<ThreadId> {
        CURRENT.with(Cell::get)
    }

    /// Create a kernel thread. It is ready immediately and first runs when
    /// the driver dispatches it.
    pub fn spawn<F>(self: &Arc<Self>, name: &str, body: F) -> ThreadId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut inner = self.lock();
            let id = ThreadId(inner.next_id);
            inner.next_id += 1;
            inner.threads.insert(
                id,
                SimThread {
                    status: SimStatus::Ready,
                    irq: true,
                },
            );
            inner.ready.push_back(id);
            id
        };

        let machine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || {
                CURRENT.with(|current| current.set(Some(id)));
                machine.wait_turn(id);
                let outcome = panic::catch_unwind(AssertUnwindSafe(body));
                let payload = outcome.err().filter(|payload| !payload.is::<ThreadExit>());
                machine.retire(id, payload);
            });
        if let Err(err) = spawned {
            panic!("failed to start host thread for {id}: {err}");
        }

        log::trace!("[sim] spawned {name} as {id}");
        id
    }

    /// Dispatch ready threads until none is left. Blocked threads stay
    /// blocked; the clock does not move.
    pub fn run(&self) {
        self.drain();
    }

    /// Like [`run`](Self::run), but while any thread is blocked advance the
    /// clock one tick at a time, calling `on_tick` with the new time and
    /// interrupts disabled. Stops once every thread has finished, or after
    /// `idle_limit` consecutive ticks that leave the ready set empty.
    pub fn run_with_timer<F: FnMut(Tick)>(&self, mut on_tick: F) {
        let mut idle = 0;
        loop {
            self.drain();

            let now = {
                let mut inner = self.lock();
                if !inner.any_blocked() || idle >= self.idle_limit {
                    return;
                }
                inner.ticks += 1;
                inner.ticks
            };

            let saved = self.disable();
            on_tick(now);
            self.restore(saved);

            if self.lock().ready.is_empty() {
                idle += 1;
            } else {
                idle = 0;
            }
        }
    }

    pub fn status(&self, thread: ThreadId) -> Option<SimStatus> {
        self.lock().threads.get(&thread).map(|t| t.status)
    }

    pub fn ticks(&self) -> Tick {
        self.lock().ticks
    }

    fn drain(&self) {
        loop {
            let mut inner = self.lock();
            if let Some(payload) = inner.panic.take() {
                drop(inner);
                panic::resume_unwind(payload);
            }
            let Some(next) = inner.ready.pop_front() else {
                return;
            };
            if let Some(thread) = inner.threads.get_mut(&next) {
                thread.status = SimStatus::Running;
            }
            inner.running = Some(next);
            self.turn.notify_all();
            while inner.running.is_some() {
                inner = self.turn.wait(inner).unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    fn wait_turn(&self, id: ThreadId) {
        let mut inner = self.lock();
        while inner.running != Some(id) {
            inner = self.turn.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Hand the baton back to the driver and wait to be dispatched again.
    fn switch_out(&self, id: ThreadId, status: SimStatus) {
        {
            let mut inner = self.lock();
            if let Some(thread) = inner.threads.get_mut(&id) {
                thread.status = status;
            }
            if status == SimStatus::Ready {
                inner.ready.push_back(id);
            }
            inner.running = None;
            self.turn.notify_all();
        }
        self.wait_turn(id);
    }

    fn retire(&self, id: ThreadId, payload: Option<Box<dyn Any + Send>>) {
        let mut inner = self.lock();
        if let Some(thread) = inner.threads.get_mut(&id) {
            thread.status = SimStatus::Finished;
        }
        if let Some(payload) = payload {
            inner.panic.get_or_insert(payload);
        }
        inner.running = None;
        self.turn.notify_all();
        log::trace!("[sim] {id} finished");
    }
}

impl Interrupts for SimMachine {
    fn interrupts_enabled(&self) -> bool {
        *self.lock().irq_flag(Self::context())
    }

    fn disable(&self) -> IrqState {
        let mut inner = self.lock();
        let flag = inner.irq_flag(Self::context());
        IrqState::new(core::mem::replace(flag, false))
    }

    fn restore(&self, state: IrqState) {
        *self.lock().irq_flag(Self::context()) = state.was_enabled();
    }
}

impl Machine for SimMachine {
    fn current_thread(&self) -> ThreadId {
        Self::context().unwrap_or(IDLE)
    }

    fn yield_now(&self) {
        if let Some(id) = Self::context() {
            self.switch_out(id, SimStatus::Ready);
        }
    }

    fn sleep(&self) {
        assert!(
            !self.interrupts_enabled(),
            "sleep requires interrupts disabled"
        );
        let Some(id) = Self::context() else {
            panic!("the idle context cannot sleep");
        };
        self.switch_out(id, SimStatus::Blocked);
    }

    fn ready(&self, thread: ThreadId) {
        assert!(
            !self.interrupts_enabled(),
            "ready requires interrupts disabled"
        );
        let mut inner = self.lock();
        let status = inner.threads.get(&thread).map(|t| t.status);
        assert_eq!(
            status,
            Some(SimStatus::Blocked),
            "{thread} readied while not blocked"
        );
        if let Some(t) = inner.threads.get_mut(&thread) {
            t.status = SimStatus::Ready;
        }
        inner.ready.push_back(thread);
    }

    fn finish(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }

    fn now(&self) -> Tick {
        self.lock().ticks
    }
}
