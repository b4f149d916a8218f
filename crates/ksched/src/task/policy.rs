//! Queue policies: priority vs. lottery.
//!
//! Every resource queue carries one of these tags, fixed when the queue is
//! created. The tag decides three things:
//!   - the legal range of a thread's base weight,
//!   - how waiters' weights fold into an owner's effective weight
//!     (max for priority, saturating sum for tickets),
//!   - how the next owner is chosen (highest weight, or weighted draw).

use core::fmt;
use core::str::FromStr;

use crate::error::ConfigError;
use crate::machine::ThreadId;

/// Scheduling weight: a priority level, or a ticket count under lottery.
pub type Priority = i32;

/// Lowest priority a thread can have.
pub const PRIORITY_MINIMUM: Priority = 0;
/// Priority a thread starts with.
pub const PRIORITY_DEFAULT: Priority = 1;
/// Highest priority a thread can have.
pub const PRIORITY_MAXIMUM: Priority = 7;

/// Fewest tickets a thread can hold.
pub const TICKETS_MINIMUM: Priority = 1;
/// Tickets a thread starts with.
pub const TICKETS_DEFAULT: Priority = 1;
/// Most tickets a thread (or a donation sum) can reach.
pub const TICKETS_MAXIMUM: Priority = Priority::MAX;

/// Selection and donation policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Strict priority with max-donation, FIFO within a level.
    #[default]
    Priority,
    /// Lottery with ticket-sum donation.
    Lottery,
}

impl Policy {
    /// Smallest legal base weight.
    pub const fn minimum(self) -> Priority {
        match self {
            Policy::Priority => PRIORITY_MINIMUM,
            Policy::Lottery => TICKETS_MINIMUM,
        }
    }

    /// Largest legal base weight (and donation ceiling).
    pub const fn maximum(self) -> Priority {
        match self {
            Policy::Priority => PRIORITY_MAXIMUM,
            Policy::Lottery => TICKETS_MAXIMUM,
        }
    }

    /// Base weight given to a thread on its first scheduling interaction.
    pub const fn default_weight(self) -> Priority {
        match self {
            Policy::Priority => PRIORITY_DEFAULT,
            Policy::Lottery => TICKETS_DEFAULT,
        }
    }

    /// Whether `weight` is a legal base weight.
    pub const fn contains(self, weight: Priority) -> bool {
        weight >= self.minimum() && weight <= self.maximum()
    }

    /// Clamp a requested weight to the nearest legal bound.
    pub fn clamp(self, weight: Priority) -> Priority {
        weight.clamp(self.minimum(), self.maximum())
    }

    /// Fold one waiter's effective weight into an owner's running total.
    pub(crate) fn donate(self, acc: Priority, donor: Priority) -> Priority {
        match self {
            Policy::Priority => acc.max(donor),
            Policy::Lottery => acc.saturating_add(donor).min(self.maximum()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Priority => "priority",
            Policy::Lottery => "lottery",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(Policy::Priority),
            "lottery" => Ok(Policy::Lottery),
            other => Err(ConfigError::UnknownPolicy(other.into())),
        }
    }
}

// ── Selection ───────────────────────────────────────────────────

/// One waiter as seen by a selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub thread: ThreadId,
    /// Effective weight if the queue donates, base weight otherwise.
    pub weight: Priority,
    /// Enqueue stamp; smaller means waiting longer.
    pub stamp: u64,
}

/// Highest weight wins; among equals, the longest waiter.
///
/// The running best is seeded from the first candidate rather than from a
/// zero sentinel, so a queue whose waiters all sit at the minimum weight
/// still yields its oldest waiter.
pub(crate) fn pick_highest(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<(usize, &Candidate)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let better = match best {
            None => true,
            Some((_, current)) => {
                candidate.weight > current.weight
                    || (candidate.weight == current.weight && candidate.stamp < current.stamp)
            }
        };
        if better {
            best = Some((index, candidate));
        }
    }
    best.map(|(index, _)| index)
}
