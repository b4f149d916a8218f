// =============================================================================
// MinimalOS NextGen — Execution Substrate Interface
// =============================================================================
//
// The scheduling core never touches hardware. Everything it needs from the
// machine goes through the two traits in this file:
//
//   Interrupts   the atomic bracket. Disable interrupts, hand back a token
//                describing the prior state, restore from that token.
//   Machine      the thread substrate. Who is running, yield, sleep until
//                readied, put a thread in the run set, terminate, plus the
//                monotonic tick clock.
//
// The kernel crate implements these on top of its context switch and LAPIC
// timer. Tests implement them on host threads (see `sim`).
//
// IRQ SAFETY:
//   Every mutation of queue or thread scheduling state happens with
//   interrupts disabled. We save the previous interrupt state so nested
//   brackets restore correctly:
//     - If interrupts were enabled  → disabled inside, re-enabled on exit
//     - If interrupts were disabled → they stay disabled after exit
//
//   `IrqGuard` is the RAII form. The bracket is released on every exit
//   path, including early returns, because `Drop` runs on all of them.
//
// =============================================================================

use alloc::sync::Arc;
use core::fmt;

/// Unit of the kernel's discrete logical clock.
pub type Tick = u64;

/// Opaque thread handle owned by the substrate.
///
/// The scheduler only compares and stores these; it never dereferences
/// them or assumes anything about how they are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Interrupt state saved by [`Interrupts::disable`].
///
/// Opaque to callers: the only thing to do with it is hand it back to
/// [`Interrupts::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an interrupt state that is never restored leaves interrupts disabled"]
pub struct IrqState {
    was_enabled: bool,
}

impl IrqState {
    /// Wrap the interrupt flag observed just before disabling.
    pub const fn new(was_enabled: bool) -> Self {
        Self { was_enabled }
    }

    /// Whether interrupts were enabled when this state was captured.
    pub const fn was_enabled(self) -> bool {
        self.was_enabled
    }
}

/// The atomic bracket.
pub trait Interrupts {
    /// Checks whether interrupts are currently enabled on this core.
    fn interrupts_enabled(&self) -> bool;

    /// Disables interrupts, returning the state to restore later.
    fn disable(&self) -> IrqState;

    /// Restores the interrupt state captured by a matching `disable`.
    fn restore(&self, state: IrqState);
}

/// The thread substrate consumed by the scheduler.
///
/// `sleep`, `ready` and `finish` are called with interrupts disabled.
pub trait Machine: Interrupts {
    /// The thread currently holding the CPU.
    fn current_thread(&self) -> ThreadId;

    /// Give up the CPU; the caller stays runnable.
    fn yield_now(&self);

    /// Deschedule the caller until some other context calls `ready` on it.
    fn sleep(&self);

    /// Move a blocked thread into the run set. Eligibility only: the thread
    /// runs when the substrate next picks it.
    fn ready(&self, thread: ThreadId);

    /// Terminate the calling thread.
    fn finish(&self) -> !;

    /// Monotonic tick count.
    fn now(&self) -> Tick;
}

impl<T: Interrupts + ?Sized> Interrupts for Arc<T> {
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }

    fn disable(&self) -> IrqState {
        (**self).disable()
    }

    fn restore(&self, state: IrqState) {
        (**self).restore(state)
    }
}

impl<T: Machine + ?Sized> Machine for Arc<T> {
    fn current_thread(&self) -> ThreadId {
        (**self).current_thread()
    }

    fn yield_now(&self) {
        (**self).yield_now()
    }

    fn sleep(&self) {
        (**self).sleep()
    }

    fn ready(&self, thread: ThreadId) {
        (**self).ready(thread)
    }

    fn finish(&self) -> ! {
        (**self).finish()
    }

    fn now(&self) -> Tick {
        (**self).now()
    }
}

// ── Atomic bracket guard ────────────────────────────────────────

/// RAII guard for an interrupt-disabled region.
///
/// While this guard exists interrupts are disabled on the current core.
/// When it is dropped the previous interrupt state is restored, so nested
/// guards compose.
///
/// ```ignore
/// {
///     let _irq = IrqGuard::new(&machine);
///     // ... mutate scheduling state ...
/// } // interrupts restored here
/// ```
pub struct IrqGuard<'a, I: Interrupts + ?Sized> {
    irq: &'a I,
    saved: IrqState,
}

impl<'a, I: Interrupts + ?Sized> IrqGuard<'a, I> {
    /// Disables interrupts, remembering whether they were enabled.
    pub fn new(irq: &'a I) -> Self {
        let saved = irq.disable();
        Self { irq, saved }
    }

    /// The state that will be restored on drop.
    pub fn saved(&self) -> IrqState {
        self.saved
    }
}

impl<I: Interrupts + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        self.irq.restore(self.saved);
    }
}

/// Single-threaded machine that counts bracket entries. Nothing blocks.
#[cfg(test)]
pub(crate) mod counting {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) struct Counting {
        irq: AtomicBool,
        disables: AtomicUsize,
    }

    impl Counting {
        pub(crate) const CURRENT: ThreadId = ThreadId(1);

        pub(crate) fn new() -> Self {
            Self {
                irq: AtomicBool::new(true),
                disables: AtomicUsize::new(0),
            }
        }

        pub(crate) fn disables(&self) -> usize {
            self.disables.load(Ordering::SeqCst)
        }
    }

    impl Interrupts for Counting {
        fn interrupts_enabled(&self) -> bool {
            self.irq.load(Ordering::SeqCst)
        }

        fn disable(&self) -> IrqState {
            self.disables.fetch_add(1, Ordering::SeqCst);
            IrqState::new(self.irq.swap(false, Ordering::SeqCst))
        }

        fn restore(&self, state: IrqState) {
            self.irq.store(state.was_enabled(), Ordering::SeqCst);
        }
    }

    impl Machine for Counting {
        fn current_thread(&self) -> ThreadId {
            Self::CURRENT
        }

        fn yield_now(&self) {}

        fn sleep(&self) {
            panic!("the counting machine cannot block");
        }

        fn ready(&self, _thread: ThreadId) {}

        fn finish(&self) -> ! {
            panic!("the counting machine cannot finish threads");
        }

        fn now(&self) -> Tick {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Flag(Cell<bool>);

    impl Interrupts for Flag {
        fn interrupts_enabled(&self) -> bool {
            self.0.get()
        }

        fn disable(&self) -> IrqState {
            IrqState::new(self.0.replace(false))
        }

        fn restore(&self, state: IrqState) {
            self.0.set(state.was_enabled());
        }
    }

    #[test]
    fn guard_restores_enabled_state() {
        let flag = Flag(Cell::new(true));
        {
            let guard = IrqGuard::new(&flag);
            assert!(!flag.interrupts_enabled());
            assert!(guard.saved().was_enabled());
        }
        assert!(flag.interrupts_enabled());
    }

    #[test]
    fn nested_guards_keep_interrupts_off_until_outermost_drop() {
        let flag = Flag(Cell::new(true));
        let outer = IrqGuard::new(&flag);
        {
            let inner = IrqGuard::new(&flag);
            assert!(!inner.saved().was_enabled());
        }
        assert!(!flag.interrupts_enabled());
        drop(outer);
        assert!(flag.interrupts_enabled());
    }

    #[test]
    fn early_return_releases_bracket() {
        fn bail(flag: &Flag, early: bool) -> u32 {
            let _irq = IrqGuard::new(flag);
            if early {
                return 1;
            }
            2
        }

        let flag = Flag(Cell::new(true));
        assert_eq!(bail(&flag, true), 1);
        assert!(flag.interrupts_enabled());
        assert_eq!(bail(&flag, false), 2);
        assert!(flag.interrupts_enabled());
    }

    #[test]
    fn thread_id_display() {
        assert_eq!(alloc::format!("{}", ThreadId(7)), "T7");
    }
}
