//! Pure balance arithmetic.
//!
//! Every balance mutation the engine performs is computed here first and
//! written back as explicit values, never as `SET x = x - n` against
//! unvalidated state. Keeping the arithmetic pure makes the conservation
//! invariants property-testable without a database.

/// Escrow- or category-level balance triple. Conservation invariant:
/// `total == remaining + spent` at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balances {
    pub total: i64,
    pub remaining: i64,
    pub spent: i64,
}

impl Balances {
    pub fn new(total: i64) -> Self {
        Balances {
            total,
            remaining: total,
            spent: 0,
        }
    }

    pub fn conserved(&self) -> bool {
        self.remaining >= 0 && self.spent >= 0 && self.total == self.remaining + self.spent
    }

    /// Move `amount` from remaining to spent. `None` when remaining is
    /// insufficient; the caller maps that to the domain error.
    pub fn reserve(&self, amount: i64) -> Option<Balances> {
        if amount <= 0 || self.remaining < amount {
            return None;
        }
        Some(Balances {
            total: self.total,
            remaining: self.remaining - amount,
            spent: self.spent + amount,
        })
    }

    /// Compensating action for a rejected reservation: move `amount` back
    /// from spent to remaining.
    pub fn restore(&self, amount: i64) -> Option<Balances> {
        if amount <= 0 || self.spent < amount {
            return None;
        }
        Some(Balances {
            total: self.total,
            remaining: self.remaining + amount,
            spent: self.spent - amount,
        })
    }

    /// Terminal sweep: the whole remaining balance leaves the escrow as a
    /// refund/expiry-return settlement. Returns the post-sweep balances and
    /// the swept amount.
    pub fn sweep(&self) -> (Balances, i64) {
        let swept = self.remaining;
        (
            Balances {
                total: self.total,
                remaining: 0,
                spent: self.spent + swept,
            },
            swept,
        )
    }
}

/// Per-recipient, per-calendar-day spend window. Conservation invariant:
/// `limit == spent_today + remaining_today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub limit: i64,
    pub spent_today: i64,
    pub remaining_today: i64,
    pub tx_count: i32,
}

impl DayWindow {
    pub fn new(limit: i64) -> Self {
        DayWindow {
            limit,
            spent_today: 0,
            remaining_today: limit,
            tx_count: 0,
        }
    }

    pub fn conserved(&self) -> bool {
        self.spent_today >= 0
            && self.remaining_today >= 0
            && self.limit == self.spent_today + self.remaining_today
    }

    pub fn reserve(&self, amount: i64) -> Option<DayWindow> {
        if amount <= 0 || self.remaining_today < amount {
            return None;
        }
        Some(DayWindow {
            limit: self.limit,
            spent_today: self.spent_today + amount,
            remaining_today: self.remaining_today - amount,
            tx_count: self.tx_count + 1,
        })
    }

    pub fn restore(&self, amount: i64) -> Option<DayWindow> {
        if amount <= 0 || self.spent_today < amount {
            return None;
        }
        Some(DayWindow {
            limit: self.limit,
            spent_today: self.spent_today - amount,
            remaining_today: self.remaining_today + amount,
            tx_count: self.tx_count,
        })
    }
}

/// Category allocations must cover the escrow total exactly, with positive
/// lines and no duplicate names (checked separately at the DTO layer).
pub fn allocations_match_total(allocations: &[i64], total: i64) -> bool {
    if allocations.is_empty() || allocations.iter().any(|a| *a <= 0) {
        return false;
    }
    let mut sum: i64 = 0;
    for a in allocations {
        sum = match sum.checked_add(*a) {
            Some(s) => s,
            None => return false,
        };
    }
    sum == total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_moves_remaining_to_spent() {
        let b = Balances::new(50_000);
        let after = b.reserve(10_000).unwrap();
        assert_eq!(after.remaining, 40_000);
        assert_eq!(after.spent, 10_000);
        assert!(after.conserved());
    }

    #[test]
    fn test_reserve_insufficient() {
        let b = Balances::new(5_000);
        assert!(b.reserve(5_001).is_none());
        assert!(b.reserve(0).is_none());
        assert!(b.reserve(-1).is_none());
        // Exact drain is allowed
        assert!(b.reserve(5_000).is_some());
    }

    #[test]
    fn test_restore_is_exact_inverse_of_reserve() {
        let b = Balances::new(50_000);
        let reserved = b.reserve(12_345).unwrap();
        let restored = reserved.restore(12_345).unwrap();
        assert_eq!(restored, b);
    }

    #[test]
    fn test_sweep_zeroes_remaining() {
        let b = Balances::new(50_000).reserve(10_000).unwrap();
        let (after, swept) = b.sweep();
        assert_eq!(swept, 40_000);
        assert_eq!(after.remaining, 0);
        assert_eq!(after.spent, 50_000);
        assert!(after.conserved());
    }

    #[test]
    fn test_day_window_reserve_and_restore() {
        let w = DayWindow::new(50_000);
        let after = w.reserve(20_000).unwrap();
        assert_eq!(after.remaining_today, 30_000);
        assert_eq!(after.tx_count, 1);
        assert!(after.conserved());

        // Restoration does not un-count the transaction
        let restored = after.restore(20_000).unwrap();
        assert_eq!(restored.remaining_today, 50_000);
        assert_eq!(restored.tx_count, 1);
        assert!(restored.conserved());
    }

    #[test]
    fn test_day_window_never_exceeds_limit() {
        let w = DayWindow::new(50_000);
        let w = w.reserve(20_000).unwrap();
        let w = w.reserve(20_000).unwrap();
        assert!(w.reserve(20_000).is_none());
        assert!(w.spent_today <= w.limit);
    }

    #[test]
    fn test_allocations_match_total() {
        assert!(allocations_match_total(&[30_000, 20_000], 50_000));
        assert!(!allocations_match_total(&[30_000, 20_000], 49_999));
        assert!(!allocations_match_total(&[], 0));
        assert!(!allocations_match_total(&[50_000, -1, 1], 50_000));
    }
}
