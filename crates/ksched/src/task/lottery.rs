//! Lottery selection.
//!
//! A queue holding tickets picks its next owner by drawing one winning
//! ticket out of all tickets held by its waiters. Nothing is stored per
//! ticket: we walk the waiters, accumulating their counts, and stop at the
//! first one whose running total reaches the draw. Billions of tickets cost
//! the same as ten.
//!
//! Sums saturate at [`TICKETS_MAXIMUM`] instead of wrapping.

use super::policy::{Candidate, Priority, TICKETS_MAXIMUM};
use crate::rng::XorShift64;

/// Saturating sum of the candidates' tickets.
pub(crate) fn ticket_total(candidates: &[Candidate]) -> Priority {
    candidates
        .iter()
        .fold(0, |total: Priority, c| total.saturating_add(c.weight.max(0)))
        .min(TICKETS_MAXIMUM)
}

/// Draw a winner in proportion to ticket share.
///
/// Returns `None` when the pool holds no tickets at all.
pub(crate) fn draw(candidates: &[Candidate], rng: &mut XorShift64) -> Option<usize> {
    let total = ticket_total(candidates);
    if total <= 0 {
        return None;
    }

    let winning = rng.draw(total as u64) as Priority;
    let mut running: Priority = 0;
    for (index, candidate) in candidates.iter().enumerate() {
        running = running.saturating_add(candidate.weight.max(0));
        if running >= winning {
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::ThreadId;

    fn holder(thread: u64, tickets: Priority) -> Candidate {
        Candidate {
            thread: ThreadId(thread),
            weight: tickets,
            stamp: thread,
        }
    }

    #[test]
    fn empty_pool_picks_nobody() {
        let mut rng = XorShift64::new(1);
        assert_eq!(draw(&[], &mut rng), None);
        assert_eq!(draw(&[holder(1, 0)], &mut rng), None);
    }

    #[test]
    fn single_holder_always_wins() {
        let mut rng = XorShift64::new(5);
        for _ in 0..100 {
            assert_eq!(draw(&[holder(1, 9)], &mut rng), Some(0));
        }
    }

    #[test]
    fn one_to_three_share_converges() {
        let pool = [holder(1, 1), holder(2, 3)];
        let mut rng = XorShift64::new(0xC0FFEE);
        let rounds = 20_000;
        let heavy = (0..rounds)
            .filter(|_| draw(&pool, &mut rng) == Some(1))
            .count();
        let share = heavy as f64 / rounds as f64;
        assert!((share - 0.75).abs() < 0.02, "observed share {share}");
    }

    #[test]
    fn total_saturates_instead_of_wrapping() {
        let pool = [holder(1, TICKETS_MAXIMUM), holder(2, TICKETS_MAXIMUM), holder(3, 5)];
        assert_eq!(ticket_total(&pool), TICKETS_MAXIMUM);

        let mut rng = XorShift64::new(3);
        for _ in 0..100 {
            let winner = draw(&pool, &mut rng).unwrap();
            assert!(winner < pool.len());
        }
    }

    #[test]
    fn same_seed_same_winners() {
        let pool = [holder(1, 2), holder(2, 5), holder(3, 1)];
        let mut a = XorShift64::new(77);
        let mut b = XorShift64::new(77);
        for _ in 0..200 {
            assert_eq!(draw(&pool, &mut a), draw(&pool, &mut b));
        }
    }
}
