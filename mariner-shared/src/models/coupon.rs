use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// Which orders a coupon may be applied to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CouponScope {
    General,
    Ship,
    Package,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    /// Unique ignoring ASCII case.
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub scope: CouponScope,
    pub applicable_ships: Vec<Uuid>,
    pub applicable_plans: Vec<Uuid>,
    pub single_use_only: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    pub fn new(code: String, discount_type: DiscountType, discount_value: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code,
            description: None,
            discount_type,
            discount_value,
            min_order_amount: None,
            max_uses: None,
            used_count: 0,
            valid_from: None,
            valid_until: None,
            scope: CouponScope::General,
            applicable_ships: Vec::new(),
            applicable_plans: Vec::new(),
            single_use_only: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches_code(&self, code: &str) -> bool {
        self.code.eq_ignore_ascii_case(code.trim())
    }

    /// False once `used_count` has reached `max_uses`. Unlimited coupons always have uses left.
    pub fn has_uses_left(&self) -> bool {
        match self.max_uses {
            Some(max) => self.used_count < max,
            None => true,
        }
    }
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

impl CouponScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponScope::General => "general",
            CouponScope::Ship => "ship",
            CouponScope::Package => "package",
        }
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CouponScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed" => Ok(DiscountType::Fixed),
            other => Err(format!("unknown discount type: {}", other)),
        }
    }
}

impl FromStr for CouponScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(CouponScope::General),
            "ship" => Ok(CouponScope::Ship),
            "package" => Ok(CouponScope::Package),
            other => Err(format!("unknown coupon scope: {}", other)),
        }
    }
}
