use chrono::{DateTime, Utc};
use mariner_shared::{Coupon, CouponScope, DiscountType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::RejectionReason;

/// Answer to "can this code be applied to this order?"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<Coupon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<RejectionReason>,
}

impl CouponValidation {
    pub fn accepted(coupon: Coupon, discount_amount: Decimal) -> Self {
        Self {
            valid: true,
            coupon: Some(coupon),
            discount_amount: Some(discount_amount),
            reason_code: None,
        }
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            valid: false,
            coupon: None,
            discount_amount: None,
            reason_code: Some(reason),
        }
    }
}

/// Admin input for a new coupon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCoupon {
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub max_uses: Option<i32>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_scope")]
    pub scope: CouponScope,
    #[serde(default)]
    pub applicable_ships: Vec<Uuid>,
    #[serde(default)]
    pub applicable_plans: Vec<Uuid>,
    #[serde(default)]
    pub single_use_only: bool,
}

fn default_scope() -> CouponScope {
    CouponScope::General
}

impl NewCoupon {
    pub fn new(code: impl Into<String>, discount_type: DiscountType, discount_value: Decimal) -> Self {
        Self {
            code: code.into(),
            description: None,
            discount_type,
            discount_value,
            min_order_amount: None,
            max_uses: None,
            valid_from: None,
            valid_until: None,
            scope: CouponScope::General,
            applicable_ships: Vec::new(),
            applicable_plans: Vec::new(),
            single_use_only: false,
        }
    }
}
