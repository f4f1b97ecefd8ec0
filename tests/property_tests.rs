//! Property-based tests for ledger invariants
//!
//! These use proptest to verify the conservation laws the engine enforces:
//! - Escrow/category conservation: total == remaining + spent
//! - Daily window conservation: limit == spent_today + remaining_today
//! - spent_today never exceeds the limit, whatever the reservation sequence
//! - Reject compensation restores exactly what reservation deducted

use escrow_engine::ledger::arith::{allocations_match_total, Balances, DayWindow};
use proptest::prelude::*;

fn amount_strategy() -> impl Strategy<Value = i64> {
    1i64..2_000_000
}

proptest! {
    #[test]
    fn conservation_holds_after_reserve(
        total in 1i64..10_000_000,
        amount in amount_strategy(),
    ) {
        let balances = Balances::new(total);
        prop_assert!(balances.conserved());

        match balances.reserve(amount) {
            Some(after) => {
                prop_assert!(after.conserved());
                prop_assert_eq!(after.total, total);
                prop_assert_eq!(after.spent, amount);
            }
            None => prop_assert!(amount > total),
        }
    }

    #[test]
    fn reserve_then_restore_round_trips(
        total in 1i64..10_000_000,
        amount in amount_strategy(),
    ) {
        let balances = Balances::new(total);
        if let Some(reserved) = balances.reserve(amount) {
            let restored = reserved.restore(amount).expect("reserved amount restores");
            prop_assert_eq!(restored, balances);
        }
    }

    #[test]
    fn conservation_holds_under_random_sequences(
        total in 1i64..10_000_000,
        ops in prop::collection::vec((any::<bool>(), amount_strategy()), 0..64),
    ) {
        let mut balances = Balances::new(total);
        // Model of outstanding (not yet rejected) reservations
        let mut outstanding: Vec<i64> = Vec::new();

        for (is_reserve, amount) in ops {
            if is_reserve {
                if let Some(next) = balances.reserve(amount) {
                    balances = next;
                    outstanding.push(amount);
                }
            } else if let Some(amount) = outstanding.pop() {
                balances = balances.restore(amount).expect("outstanding amount restores");
            }

            prop_assert!(balances.conserved());
            prop_assert_eq!(balances.total, total);
            prop_assert!(balances.remaining >= 0);
            prop_assert_eq!(balances.spent, outstanding.iter().sum::<i64>());
        }
    }

    #[test]
    fn day_window_never_exceeds_limit(
        limit in 1i64..1_000_000,
        amounts in prop::collection::vec(amount_strategy(), 0..32),
    ) {
        let mut window = DayWindow::new(limit);
        let mut accepted = 0;

        for amount in amounts {
            if let Some(next) = window.reserve(amount) {
                window = next;
                accepted += 1;
            }

            prop_assert!(window.conserved());
            prop_assert!(window.spent_today <= window.limit);
            prop_assert_eq!(window.tx_count as i64, accepted);
        }
    }

    #[test]
    fn day_window_restore_is_exact(
        limit in 1i64..1_000_000,
        amount in amount_strategy(),
    ) {
        let window = DayWindow::new(limit);
        if let Some(reserved) = window.reserve(amount) {
            let restored = reserved.restore(amount).expect("reserved amount restores");
            prop_assert_eq!(restored.remaining_today, limit);
            prop_assert_eq!(restored.spent_today, 0);
            // The transaction still happened; the count is not unwound
            prop_assert_eq!(restored.tx_count, 1);
        }
    }

    #[test]
    fn allocations_sum_check_is_exact(
        allocations in prop::collection::vec(1i64..1_000_000, 1..8),
    ) {
        let total: i64 = allocations.iter().sum();
        prop_assert!(allocations_match_total(&allocations, total));
        prop_assert!(!allocations_match_total(&allocations, total + 1));
        prop_assert!(!allocations_match_total(&allocations, total - 1));
    }
}
