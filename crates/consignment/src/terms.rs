use serde::{Deserialize, Serialize};

use cardflow_core::{DomainError, DomainResult, ValueObject};

/// Revenue-share terms under which a consigned card is sold.
///
/// Captured as a value snapshot on the card at arrival time: later edits to a
/// consignor's defaults never reach already-arrived cards. Amounts are integer
/// cents; the share is whole percent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentTerms {
    /// Consignor's share of the sale price, in whole percent (0..=100).
    pub share_percentage: u8,
    /// Minimum payout in cents; 0 means no floor.
    pub floor_price: u64,
    /// Whether the consignor carries a proportional share of platform fees.
    pub deduct_fees: bool,
    /// Days after sale during which the card may be returned to the consignor.
    pub return_window_days: u32,
}

impl ConsignmentTerms {
    pub fn new(
        share_percentage: u8,
        floor_price: u64,
        deduct_fees: bool,
        return_window_days: u32,
    ) -> DomainResult<Self> {
        if share_percentage > 100 {
            return Err(DomainError::validation(format!(
                "share_percentage must be within 0..=100, got {share_percentage}"
            )));
        }
        Ok(Self {
            share_percentage,
            floor_price,
            deduct_fees,
            return_window_days,
        })
    }

    /// Payout owed to the consignor for a realized sale.
    ///
    /// `payout = max(sale_price * share%, floor) - (deduct_fees ? fees : 0)`,
    /// clamped at zero. Integer cents throughout; the share product floors.
    pub fn payout_due(&self, sale_price: u64, proportional_fees: u64) -> u64 {
        let base = (u128::from(sale_price) * u128::from(self.share_percentage) / 100) as u64;
        let due = base.max(self.floor_price);
        if self.deduct_fees {
            due.saturating_sub(proportional_fees)
        } else {
            due
        }
    }
}

impl ValueObject for ConsignmentTerms {}

/// Split `total` across `weights` proportionally (floor rounding).
///
/// Used to attribute a bulk-sale stream's gross sales (and its fees) to
/// individual member cards, weighted by purchase price. Zero total weight
/// falls back to an equal split. The floor rounding means allocations sum to
/// at most `total`; the remainder stays with the house.
pub fn allocate_pro_rata(total: u64, weights: &[u64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }

    let weight_sum: u128 = weights.iter().map(|w| u128::from(*w)).sum();
    if weight_sum == 0 {
        let equal = total / weights.len() as u64;
        return vec![equal; weights.len()];
    }

    weights
        .iter()
        .map(|w| (u128::from(total) * u128::from(*w) / weight_sum) as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn floor_price_wins_over_low_share() {
        let terms = ConsignmentTerms::new(70, 50_00, false, 0).unwrap();
        assert_eq!(terms.payout_due(40_00, 0), 50_00);
    }

    #[test]
    fn share_wins_when_above_floor() {
        let terms = ConsignmentTerms::new(75, 0, true, 0).unwrap();
        assert_eq!(terms.payout_due(200_00, 10_00), 140_00);
    }

    #[test]
    fn fees_are_ignored_unless_deducted() {
        let terms = ConsignmentTerms::new(75, 0, false, 0).unwrap();
        assert_eq!(terms.payout_due(200_00, 10_00), 150_00);
    }

    #[test]
    fn payout_never_goes_negative() {
        let terms = ConsignmentTerms::new(10, 0, true, 0).unwrap();
        assert_eq!(terms.payout_due(10_00, 5_00), 0);
    }

    #[test]
    fn share_above_hundred_is_rejected() {
        let err = ConsignmentTerms::new(101, 0, false, 0).unwrap_err();
        match err {
            cardflow_core::DomainError::Validation(msg) if msg.contains("share_percentage") => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn pro_rata_follows_weights_exactly_when_divisible() {
        assert_eq!(
            allocate_pro_rata(100_00, &[50_00, 30_00, 20_00]),
            vec![50_00, 30_00, 20_00]
        );
    }

    #[test]
    fn pro_rata_floors_the_remainder() {
        assert_eq!(allocate_pro_rata(100, &[1, 1, 1]), vec![33, 33, 33]);
    }

    #[test]
    fn pro_rata_zero_weights_splits_equally() {
        assert_eq!(allocate_pro_rata(90, &[0, 0, 0]), vec![30, 30, 30]);
    }

    #[test]
    fn pro_rata_empty_weights_yields_nothing() {
        assert!(allocate_pro_rata(100, &[]).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: allocations never exceed the total, individually or summed.
        #[test]
        fn pro_rata_allocations_are_bounded(
            total in 0u64..10_000_000,
            weights in prop::collection::vec(0u64..1_000_000, 1..12)
        ) {
            let allocations = allocate_pro_rata(total, &weights);
            prop_assert_eq!(allocations.len(), weights.len());
            let sum: u128 = allocations.iter().map(|a| u128::from(*a)).sum();
            prop_assert!(sum <= u128::from(total));
            for a in &allocations {
                prop_assert!(*a <= total);
            }
        }

        /// Property: payout respects the floor and clamps at zero.
        #[test]
        fn payout_respects_floor_and_zero_clamp(
            share in 0u8..=100,
            floor in 0u64..1_000_000,
            price in 0u64..1_000_000,
            fees in 0u64..1_000_000,
            deduct in any::<bool>()
        ) {
            let terms = ConsignmentTerms::new(share, floor, deduct, 0).unwrap();
            let due = terms.payout_due(price, fees);
            if !deduct {
                prop_assert!(due >= floor);
            }
            let undeducted = terms.payout_due(price, 0);
            prop_assert!(due <= undeducted);
        }
    }
}
