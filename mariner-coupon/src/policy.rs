use mariner_core::repository::{CouponRepository, OrderRepository, RepoError};
use mariner_shared::{Coupon, CouponScope, DiscountType};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::code::CouponCode;
use crate::models::{CouponValidation, NewCoupon};
use crate::rules::{self, RejectionReason, ValidationContext};
use crate::CouponError;

/// Coupon Policy Engine: validation without side effects, plus coupon administration.
pub struct CouponPolicy {
    coupons: Arc<dyn CouponRepository>,
    orders: Arc<dyn OrderRepository>,
}

impl CouponPolicy {
    pub fn new(coupons: Arc<dyn CouponRepository>, orders: Arc<dyn OrderRepository>) -> Self {
        Self { coupons, orders }
    }

    /// Check `code` against the order context. Business rejections come back
    /// as `Ok` with a reason code; only malformed input and storage failures
    /// are errors.
    pub async fn validate(&self, code: &str, ctx: &ValidationContext) -> Result<CouponValidation, CouponError> {
        let code = CouponCode::parse(code)?;
        if ctx.subtotal < Decimal::ZERO {
            return Err(CouponError::Invalid("subtotal cannot be negative".into()));
        }

        let coupon = self.coupons.find_by_code(code.as_str()).await?;

        let prior_redemptions = match &coupon {
            Some(c) if c.single_use_only => {
                self.orders
                    .count_coupon_redemptions(&ctx.user_id, c.id, ctx.exclude_order)
                    .await?
            }
            _ => 0,
        };

        match (rules::evaluate(coupon.as_ref(), ctx, prior_redemptions), coupon) {
            (Ok(discount), Some(coupon)) => Ok(CouponValidation::accepted(coupon, discount)),
            (outcome, _) => {
                let reason = outcome.err().unwrap_or(RejectionReason::NotFound);
                debug!(code = %code, user_id = %ctx.user_id, reason = %reason, "Coupon rejected");
                Ok(CouponValidation::rejected(reason))
            }
        }
    }

    pub async fn create(&self, input: NewCoupon) -> Result<Coupon, CouponError> {
        let code = CouponCode::parse(&input.code)?;

        match input.discount_type {
            DiscountType::Percentage
                if input.discount_value <= Decimal::ZERO
                    || input.discount_value > Decimal::ONE_HUNDRED =>
            {
                return Err(CouponError::Invalid(
                    "percentage discount must be in (0, 100]".into(),
                ));
            }
            DiscountType::Fixed if input.discount_value <= Decimal::ZERO => {
                return Err(CouponError::Invalid("fixed discount must be positive".into()));
            }
            _ => {}
        }
        if input.min_order_amount.is_some_and(|m| m < Decimal::ZERO) {
            return Err(CouponError::Invalid("minOrderAmount cannot be negative".into()));
        }
        if input.max_uses.is_some_and(|m| m <= 0) {
            return Err(CouponError::Invalid("maxUses must be positive".into()));
        }
        if let (Some(from), Some(until)) = (input.valid_from, input.valid_until) {
            if from >= until {
                return Err(CouponError::Invalid("validFrom must be before validUntil".into()));
            }
        }
        match input.scope {
            CouponScope::Ship if input.applicable_ships.is_empty() => {
                return Err(CouponError::Invalid("ship-scoped coupon needs applicableShips".into()));
            }
            CouponScope::Package if input.applicable_plans.is_empty() => {
                return Err(CouponError::Invalid("package-scoped coupon needs applicablePlans".into()));
            }
            _ => {}
        }

        let mut coupon = Coupon::new(code.to_string(), input.discount_type, input.discount_value);
        coupon.description = input.description;
        coupon.min_order_amount = input.min_order_amount;
        coupon.max_uses = input.max_uses;
        coupon.valid_from = input.valid_from;
        coupon.valid_until = input.valid_until;
        coupon.scope = input.scope;
        coupon.applicable_ships = input.applicable_ships;
        coupon.applicable_plans = input.applicable_plans;
        coupon.single_use_only = input.single_use_only;

        match self.coupons.create_coupon(&coupon).await {
            Ok(()) => {
                info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");
                Ok(coupon)
            }
            Err(RepoError::Duplicate(_)) => Err(CouponError::DuplicateCode(coupon.code)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<Coupon, CouponError> {
        match self.coupons.set_active(id, false).await {
            Ok(()) => {}
            Err(RepoError::NotFound(_)) => return Err(CouponError::NotFound(id)),
            Err(e) => return Err(e.into()),
        }
        info!(coupon_id = %id, "Coupon deactivated");
        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Coupon, CouponError> {
        self.coupons.get_coupon(id).await?.ok_or(CouponError::NotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Coupon>, CouponError> {
        Ok(self.coupons.list_coupons().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mariner_shared::{Order, OrderStatus};
    use mariner_store::MemoryStore;
    use rust_decimal_macros::dec;

    fn policy() -> (CouponPolicy, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CouponPolicy::new(store.clone(), store.clone()), store)
    }

    #[tokio::test]
    async fn test_validate_is_case_insensitive() {
        let (policy, _) = policy();
        policy
            .create(NewCoupon::new("Sea10", DiscountType::Percentage, dec!(10)))
            .await
            .unwrap();

        let ctx = ValidationContext::new("user-1", Uuid::new_v4(), dec!(100), vec![]);
        let result = policy.validate("sea10", &ctx).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.discount_amount, Some(dec!(10)));
        assert!(result.reason_code.is_none());
    }

    #[tokio::test]
    async fn test_validate_has_no_side_effects() {
        let (policy, _) = policy();
        let mut input = NewCoupon::new("ONCE", DiscountType::Fixed, dec!(5));
        input.max_uses = Some(1);
        let coupon = policy.create(input).await.unwrap();

        let ctx = ValidationContext::new("user-1", Uuid::new_v4(), dec!(20), vec![]);
        for _ in 0..3 {
            assert!(policy.validate("ONCE", &ctx).await.unwrap().valid);
        }
        assert_eq!(policy.get(coupon.id).await.unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn test_ship_scope_mismatch() {
        let (policy, _) = policy();
        let allowed_ship = Uuid::new_v4();
        let mut input = NewCoupon::new("FLEET", DiscountType::Percentage, dec!(15));
        input.scope = CouponScope::Ship;
        input.applicable_ships = vec![allowed_ship];
        policy.create(input).await.unwrap();

        let other = ValidationContext::new("user-1", Uuid::new_v4(), dec!(100), vec![]);
        let result = policy.validate("FLEET", &other).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.reason_code, Some(RejectionReason::ScopeShipMismatch));

        let own = ValidationContext::new("user-1", allowed_ship, dec!(100), vec![]);
        assert!(policy.validate("FLEET", &own).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_single_use_counts_only_other_redeemed_orders() {
        let (policy, store) = policy();
        let mut input = NewCoupon::new("WELCOME", DiscountType::Fixed, dec!(5));
        input.single_use_only = true;
        let coupon = policy.create(input).await.unwrap();

        let mut order = Order::new("user-1".into(), Uuid::new_v4());
        order.add_item(Uuid::new_v4(), 1, dec!(50));
        order.apply_pricing(Some(coupon.id), dec!(0), dec!(45));
        store.create_order(&order).await.unwrap();

        let ctx = ValidationContext::new("user-1", order.ship_id, dec!(50), vec![]);
        // A pending order is not a redemption yet
        assert!(policy.validate("WELCOME", &ctx).await.unwrap().valid);

        store.confirm_payment(order.id, "pay_1", chrono::Utc::now()).await.unwrap();
        let result = policy.validate("WELCOME", &ctx).await.unwrap();
        assert_eq!(result.reason_code, Some(RejectionReason::SingleUseAlreadyUsed));

        // The order itself does not count against its own re-validation
        let own = ctx.clone().excluding(order.id);
        assert!(policy.validate("WELCOME", &own).await.unwrap().valid);

        // Other users are unaffected
        let other = ValidationContext::new("user-2", order.ship_id, dec!(50), vec![]);
        assert!(policy.validate("WELCOME", &other).await.unwrap().valid);

        store
            .transition(order.id, OrderStatus::Paid, OrderStatus::Refunded, None)
            .await
            .unwrap();
        assert!(!policy.validate("WELCOME", &ctx).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_malformed_code_is_an_error() {
        let (policy, _) = policy();
        let ctx = ValidationContext::new("user-1", Uuid::new_v4(), dec!(100), vec![]);
        assert!(matches!(
            policy.validate("bad code!", &ctx).await,
            Err(CouponError::InvalidCode(_))
        ));
        let result = policy.validate("MISSING", &ctx).await.unwrap();
        assert_eq!(result.reason_code, Some(RejectionReason::NotFound));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (policy, _) = policy();

        let cases = [
            NewCoupon::new("P0", DiscountType::Percentage, dec!(0)),
            NewCoupon::new("P101", DiscountType::Percentage, dec!(100.01)),
            NewCoupon::new("F0", DiscountType::Fixed, dec!(0)),
            {
                let mut c = NewCoupon::new("WINDOW", DiscountType::Fixed, dec!(5));
                let now = chrono::Utc::now();
                c.valid_from = Some(now);
                c.valid_until = Some(now - chrono::Duration::days(1));
                c
            },
            {
                let mut c = NewCoupon::new("SHIPS", DiscountType::Fixed, dec!(5));
                c.scope = CouponScope::Ship;
                c
            },
            {
                let mut c = NewCoupon::new("PLANS", DiscountType::Fixed, dec!(5));
                c.scope = CouponScope::Package;
                c
            },
        ];
        for input in cases {
            let code = input.code.clone();
            assert!(
                matches!(policy.create(input).await, Err(CouponError::Invalid(_))),
                "{} should be rejected",
                code
            );
        }

        policy
            .create(NewCoupon::new("FULL", DiscountType::Percentage, dec!(100)))
            .await
            .unwrap();
        assert!(matches!(
            policy
                .create(NewCoupon::new("full", DiscountType::Fixed, dec!(5)))
                .await,
            Err(CouponError::DuplicateCode(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivate() {
        let (policy, _) = policy();
        let coupon = policy
            .create(NewCoupon::new("SUMMER", DiscountType::Fixed, dec!(5)))
            .await
            .unwrap();

        let updated = policy.deactivate(coupon.id).await.unwrap();
        assert!(!updated.is_active);

        let ctx = ValidationContext::new("user-1", Uuid::new_v4(), dec!(100), vec![]);
        let result = policy.validate("SUMMER", &ctx).await.unwrap();
        assert_eq!(result.reason_code, Some(RejectionReason::Inactive));

        assert!(matches!(
            policy.deactivate(Uuid::new_v4()).await,
            Err(CouponError::NotFound(_))
        ));
    }
}
