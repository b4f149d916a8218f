//! Resource queues: the wait set of one shared resource.
//!
//! A queue has at most one owner (the thread holding the resource) and an
//! ordered set of waiters. Locks and join points are built from these.
//!
//! Queues live in a table inside the scheduler and are addressed by
//! generation-guarded handles `(generation << 32 | index)`: when a queue
//! is closed its slot's generation is bumped, so a stale handle can never
//! reach whatever queue later reuses the slot.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use super::policy::Policy;
use crate::machine::ThreadId;

// ── Handle ──────────────────────────────────────────────────────

/// Handle to a queue owned by a [`Scheduler`](super::scheduler::Scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u64);

impl QueueId {
    /// Pack a (generation, index) pair into a composite handle.
    #[inline]
    pub(crate) fn pack(generation: u32, index: usize) -> Self {
        Self(((generation as u64) << 32) | (index as u64 & 0xFFFF_FFFF))
    }

    /// Unpack into (generation, index).
    #[inline]
    pub(crate) fn unpack(self) -> (u32, usize) {
        ((self.0 >> 32) as u32, (self.0 & 0xFFFF_FFFF) as usize)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (generation, index) = self.unpack();
        write!(f, "Q{}.{}", index, generation)
    }
}

// ── Queue ───────────────────────────────────────────────────────

/// Contents of one resource queue.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub(crate) policy: Policy,
    /// Whether waiters donate their weight to the owner.
    pub(crate) donation: bool,
    pub(crate) owner: Option<ThreadId>,
    /// Waiters in enqueue order.
    pub(crate) waiting: VecDeque<ThreadId>,
}

impl QueueState {
    pub fn new(policy: Policy, donation: bool) -> Self {
        Self {
            policy,
            donation,
            owner: None,
            waiting: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn donation(&self) -> bool {
        self.donation
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub fn waiting(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.waiting.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }
}

// ── Table ───────────────────────────────────────────────────────

struct Slot {
    generation: u32,
    queue: Option<QueueState>,
}

/// Growable table of queue slots.
///
/// Each slot tracks its own generation counter. Lookups through a handle
/// whose generation does not match the slot are rejected.
#[derive(Default)]
pub(crate) struct QueueTable {
    slots: Vec<Slot>,
}

impl QueueTable {
    pub(crate) const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Store a queue in the first free slot.
    pub(crate) fn insert(&mut self, queue: QueueState) -> QueueId {
        if let Some(index) = self.slots.iter().position(|slot| slot.queue.is_none()) {
            let slot = &mut self.slots[index];
            slot.queue = Some(queue);
            return QueueId::pack(slot.generation, index);
        }
        self.slots.push(Slot {
            generation: 0,
            queue: Some(queue),
        });
        QueueId::pack(0, self.slots.len() - 1)
    }

    pub(crate) fn get(&self, id: QueueId) -> Option<&QueueState> {
        let (generation, index) = id.unpack();
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.queue.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: QueueId) -> Option<&mut QueueState> {
        let (generation, index) = id.unpack();
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.queue.as_mut()
    }

    /// Empty the slot and bump its generation.
    pub(crate) fn remove(&mut self, id: QueueId) -> Option<QueueState> {
        let (generation, index) = id.unpack();
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let removed = slot.queue.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(removed)
    }

    /// Number of live queues.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.queue.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips_generation_and_index() {
        let id = QueueId::pack(3, 17);
        assert_eq!(id.unpack(), (3, 17));
        assert_eq!(alloc::format!("{id}"), "Q17.3");
    }

    #[test]
    fn removed_slot_rejects_stale_handle() {
        let mut table = QueueTable::new();
        let first = table.insert(QueueState::new(Policy::Priority, true));
        assert!(table.get(first).is_some());

        assert!(table.remove(first).is_some());
        assert!(table.get(first).is_none());
        assert!(table.remove(first).is_none());

        // The slot is reused under a new generation.
        let second = table.insert(QueueState::new(Policy::Priority, false));
        assert_eq!(second.unpack().1, first.unpack().1);
        assert_ne!(second, first);
        assert!(table.get(first).is_none());
        assert!(!table.get(second).unwrap().donation());
    }

    #[test]
    fn len_counts_live_queues() {
        let mut table = QueueTable::new();
        let a = table.insert(QueueState::new(Policy::Lottery, true));
        let _b = table.insert(QueueState::new(Policy::Lottery, true));
        assert_eq!(table.len(), 2);
        table.remove(a);
        assert_eq!(table.len(), 1);
    }
}
