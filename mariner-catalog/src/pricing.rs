use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Final payable amounts after stacking a coupon discount with a loyalty discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedTotal {
    pub total: Decimal,
    pub loyalty_amount: Decimal,
    pub total_discount: Decimal,
}

/// Stacks coupon and loyalty discounts additively.
///
/// Loyalty is always taken off the original subtotal, never off the
/// coupon-reduced amount. Only `total` is rounded, to cents with midpoints
/// going away from zero.
pub struct DiscountComposer;

impl DiscountComposer {
    pub fn compose(subtotal: Decimal, coupon_discount: Decimal, loyalty_percent: Decimal) -> ComposedTotal {
        let loyalty_amount = subtotal * loyalty_percent / Decimal::ONE_HUNDRED;
        let total_discount = coupon_discount + loyalty_amount;
        let total = (subtotal - total_discount)
            .max(Decimal::ZERO)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        ComposedTotal {
            total,
            loyalty_amount,
            total_discount,
        }
    }
}

/// One rung of the loyalty ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyTier {
    pub name: String,
    pub min_spend_usd: Decimal,
    pub discount_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyStatus {
    pub current_tier: Option<String>,
    pub current_discount: Decimal,
    pub lifetime_spend: Decimal,
    pub next_tier: Option<String>,
    pub spend_to_next_tier: Option<Decimal>,
}

/// Maps lifetime spend to a discount percentage.
#[derive(Debug, Clone, Default)]
pub struct LoyaltyProgram {
    tiers: Vec<LoyaltyTier>,
}

impl LoyaltyProgram {
    pub fn new(mut tiers: Vec<LoyaltyTier>) -> Self {
        tiers.sort_by(|a, b| a.min_spend_usd.cmp(&b.min_spend_usd));
        Self { tiers }
    }

    pub fn tiers(&self) -> &[LoyaltyTier] {
        &self.tiers
    }

    pub fn status_for(&self, lifetime_spend: Decimal) -> LoyaltyStatus {
        let current = self
            .tiers
            .iter()
            .rev()
            .find(|t| t.min_spend_usd <= lifetime_spend);
        let next = self.tiers.iter().find(|t| t.min_spend_usd > lifetime_spend);

        LoyaltyStatus {
            current_tier: current.map(|t| t.name.clone()),
            current_discount: current.map(|t| t.discount_percent).unwrap_or(Decimal::ZERO),
            lifetime_spend,
            next_tier: next.map(|t| t.name.clone()),
            spend_to_next_tier: next.map(|t| t.min_spend_usd - lifetime_spend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_coupon_and_loyalty_are_additive() {
        // 10% coupon on 100 is 10; 5% loyalty on the same 100 is 5
        let composed = DiscountComposer::compose(dec!(100), dec!(10), dec!(5));
        assert_eq!(composed.loyalty_amount, dec!(5));
        assert_eq!(composed.total_discount, dec!(15));
        assert_eq!(composed.total, dec!(85));
    }

    #[test]
    fn test_total_floors_at_zero() {
        // Fixed 50 coupon on a 30 subtotal is already capped at 30
        let composed = DiscountComposer::compose(dec!(30), dec!(30), dec!(0));
        assert_eq!(composed.total, dec!(0));

        let composed = DiscountComposer::compose(dec!(30), dec!(30), dec!(10));
        assert_eq!(composed.total, dec!(0));
        assert_eq!(composed.total_discount, dec!(33));
    }

    #[test]
    fn test_midpoint_rounds_away_from_zero() {
        // 10.01 - 5.005 = 5.005
        let composed = DiscountComposer::compose(dec!(10.01), dec!(0), dec!(50));
        assert_eq!(composed.loyalty_amount, dec!(5.005));
        assert_eq!(composed.total, dec!(5.01));
    }

    #[test]
    fn test_loyalty_tier_selection() {
        let program = LoyaltyProgram::new(vec![
            LoyaltyTier { name: "Gold".into(), min_spend_usd: dec!(2000), discount_percent: dec!(10) },
            LoyaltyTier { name: "Bronze".into(), min_spend_usd: dec!(0), discount_percent: dec!(0) },
            LoyaltyTier { name: "Silver".into(), min_spend_usd: dec!(500), discount_percent: dec!(5) },
        ]);

        let status = program.status_for(dec!(750));
        assert_eq!(status.current_tier.as_deref(), Some("Silver"));
        assert_eq!(status.current_discount, dec!(5));
        assert_eq!(status.next_tier.as_deref(), Some("Gold"));
        assert_eq!(status.spend_to_next_tier, Some(dec!(1250)));

        let status = program.status_for(dec!(2000));
        assert_eq!(status.current_tier.as_deref(), Some("Gold"));
        assert!(status.next_tier.is_none());
    }

    #[test]
    fn test_no_tiers_means_no_discount() {
        let status = LoyaltyProgram::default().status_for(dec!(10000));
        assert!(status.current_tier.is_none());
        assert_eq!(status.current_discount, Decimal::ZERO);
    }

    fn cents(max: i64) -> impl Strategy<Value = Decimal> {
        (0..=max).prop_map(|c| Decimal::new(c, 2))
    }

    proptest! {
        #[test]
        fn prop_total_within_bounds(
            subtotal in cents(10_000_000),
            coupon_share in 0u32..=100,
            loyalty in 0u32..=100,
        ) {
            let coupon = subtotal * Decimal::from(coupon_share) / Decimal::ONE_HUNDRED;
            let composed = DiscountComposer::compose(subtotal, coupon, Decimal::from(loyalty));

            prop_assert!(composed.total >= Decimal::ZERO);
            prop_assert!(composed.total <= subtotal);
            prop_assert!(composed.total.scale() <= 2);
        }

        #[test]
        fn prop_matches_closed_form(
            subtotal in cents(10_000_000),
            coupon in cents(10_000_000),
            loyalty in cents(10_000),
        ) {
            let composed = DiscountComposer::compose(subtotal, coupon, loyalty);
            let loyalty_amount = subtotal * loyalty / Decimal::ONE_HUNDRED;
            let expected = (subtotal - coupon - loyalty_amount)
                .max(Decimal::ZERO)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

            prop_assert_eq!(composed.total, expected);
            prop_assert_eq!(composed.total_discount, coupon + loyalty_amount);
        }

        #[test]
        fn prop_loyalty_ignores_coupon(
            subtotal in cents(1_000_000),
            coupon_a in cents(1_000_000),
            coupon_b in cents(1_000_000),
            loyalty in 0u32..=100,
        ) {
            let a = DiscountComposer::compose(subtotal, coupon_a, Decimal::from(loyalty));
            let b = DiscountComposer::compose(subtotal, coupon_b, Decimal::from(loyalty));
            prop_assert_eq!(a.loyalty_amount, b.loyalty_amount);
        }

        #[test]
        fn prop_more_discount_never_raises_total(
            subtotal in cents(1_000_000),
            coupon in cents(1_000_000),
            extra in cents(100_000),
            loyalty in 0u32..=100,
        ) {
            let base = DiscountComposer::compose(subtotal, coupon, Decimal::from(loyalty));
            let more = DiscountComposer::compose(subtotal, coupon + extra, Decimal::from(loyalty));
            prop_assert!(more.total <= base.total);
        }
    }
}
