use chrono::{DateTime, Utc};
use mariner_shared::{Coupon, CouponScope, DiscountType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a coupon was refused. The serialized form is the stable reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotFound,
    Inactive,
    NotStarted,
    Expired,
    UsageLimitReached,
    SingleUseAlreadyUsed,
    MinimumOrderNotMet,
    ScopeShipMismatch,
    ScopePackageMismatch,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::NotFound => "not_found",
            RejectionReason::Inactive => "inactive",
            RejectionReason::NotStarted => "not_started",
            RejectionReason::Expired => "expired",
            RejectionReason::UsageLimitReached => "usage_limit_reached",
            RejectionReason::SingleUseAlreadyUsed => "single_use_already_used",
            RejectionReason::MinimumOrderNotMet => "minimum_order_not_met",
            RejectionReason::ScopeShipMismatch => "scope_ship_mismatch",
            RejectionReason::ScopePackageMismatch => "scope_package_mismatch",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RejectionReason::NotFound => "Coupon code not found",
            RejectionReason::Inactive => "Coupon is no longer active",
            RejectionReason::NotStarted => "Coupon is not valid yet",
            RejectionReason::Expired => "Coupon has expired",
            RejectionReason::UsageLimitReached => "Coupon usage limit reached",
            RejectionReason::SingleUseAlreadyUsed => "Coupon has already been used on this account",
            RejectionReason::MinimumOrderNotMet => "Order total is below the coupon minimum",
            RejectionReason::ScopeShipMismatch => "Coupon is not valid for this ship",
            RejectionReason::ScopePackageMismatch => "Coupon is not valid for the selected plans",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The order a coupon is being checked against.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub user_id: String,
    pub ship_id: Uuid,
    pub subtotal: Decimal,
    pub plan_ids: Vec<Uuid>,
    pub now: DateTime<Utc>,
    /// The order being priced, so its own redemption is not counted.
    pub exclude_order: Option<Uuid>,
}

impl ValidationContext {
    pub fn new(user_id: impl Into<String>, ship_id: Uuid, subtotal: Decimal, plan_ids: Vec<Uuid>) -> Self {
        Self {
            user_id: user_id.into(),
            ship_id,
            subtotal,
            plan_ids,
            now: Utc::now(),
            exclude_order: None,
        }
    }

    pub fn excluding(mut self, order_id: Uuid) -> Self {
        self.exclude_order = Some(order_id);
        self
    }
}

/// Run the checks in their fixed order and stop at the first failure.
///
/// `prior_redemptions` is how many other orders of this user already
/// redeemed the coupon; it only matters for single-use coupons.
pub fn evaluate(
    coupon: Option<&Coupon>,
    ctx: &ValidationContext,
    prior_redemptions: i64,
) -> Result<Decimal, RejectionReason> {
    let coupon = coupon.ok_or(RejectionReason::NotFound)?;

    if !coupon.is_active {
        return Err(RejectionReason::Inactive);
    }
    if coupon.valid_from.is_some_and(|from| ctx.now < from) {
        return Err(RejectionReason::NotStarted);
    }
    if coupon.valid_until.is_some_and(|until| ctx.now > until) {
        return Err(RejectionReason::Expired);
    }
    if !coupon.has_uses_left() {
        return Err(RejectionReason::UsageLimitReached);
    }
    if coupon.single_use_only && prior_redemptions > 0 {
        return Err(RejectionReason::SingleUseAlreadyUsed);
    }
    if coupon.min_order_amount.is_some_and(|min| ctx.subtotal < min) {
        return Err(RejectionReason::MinimumOrderNotMet);
    }

    match coupon.scope {
        CouponScope::Ship if !coupon.applicable_ships.contains(&ctx.ship_id) => {
            return Err(RejectionReason::ScopeShipMismatch);
        }
        CouponScope::Package
            if !ctx
                .plan_ids
                .iter()
                .any(|p| coupon.applicable_plans.contains(p)) =>
        {
            return Err(RejectionReason::ScopePackageMismatch);
        }
        _ => {}
    }

    Ok(discount_for(coupon, ctx.subtotal))
}

/// Discount before loyalty. Fixed amounts never exceed the subtotal.
pub fn discount_for(coupon: &Coupon, subtotal: Decimal) -> Decimal {
    match coupon.discount_type {
        DiscountType::Percentage => subtotal * coupon.discount_value / Decimal::ONE_HUNDRED,
        DiscountType::Fixed => coupon.discount_value.min(subtotal),
    }
}
