//! x86_64 interrupt bracket and tick clock — [074].
//!
//! `Cpu` implements [`Interrupts`] on RFLAGS.IF. The context switch that
//! completes a [`Machine`](crate::machine::Machine) lives in the kernel
//! crate; it delegates the bracket and the clock here.

use core::sync::atomic::{AtomicU64, Ordering};
use ::x86_64::instructions::interrupts;

use crate::machine::{Interrupts, IrqState, Tick};

/// Ticks since boot, advanced by the timer interrupt handler.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called once per timer interrupt, before `Alarm::on_tick`.
#[inline]
pub fn tick() -> Tick {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

#[inline]
pub fn now() -> Tick {
    TICKS.load(Ordering::Relaxed)
}

/// The executing core.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu;

impl Interrupts for Cpu {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    #[inline]
    fn disable(&self) -> IrqState {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        IrqState::new(was_enabled)
    }

    #[inline]
    fn restore(&self, state: IrqState) {
        if state.was_enabled() {
            interrupts::enable();
        }
    }
}
