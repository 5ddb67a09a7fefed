use mariner_coupon::CouponValidation;
use mariner_shared::{Credential, Order};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cart as submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartRequest {
    pub ship_id: Uuid,
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub plan_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteLine {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub quantity: i32,
    pub unit_price_usd: Decimal,
    pub line_total_usd: Decimal,
}

/// Priced cart. `total_usd` is what the customer would pay right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub lines: Vec<QuoteLine>,
    pub subtotal_usd: Decimal,
    pub coupon_discount_usd: Decimal,
    pub loyalty_percent: Decimal,
    pub loyalty_discount_usd: Decimal,
    pub total_discount_usd: Decimal,
    pub total_usd: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponValidation>,
}

impl Quote {
    pub fn applied_coupon_id(&self) -> Option<Uuid> {
        self.coupon
            .as_ref()
            .filter(|v| v.valid)
            .and_then(|v| v.coupon.as_ref())
            .map(|c| c.id)
    }
}

/// An order as shown to its owner, with credentials once fulfilled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub credentials: Vec<Credential>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirySummary {
    pub expired_pending: usize,
    pub expired_paid: usize,
}

impl ExpirySummary {
    pub fn total(&self) -> usize {
        self.expired_pending + self.expired_paid
    }
}
