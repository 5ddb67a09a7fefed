use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Fulfilled,
    /// Paid, but the pool could not cover every unit. Awaits retry or refund.
    FulfillmentFailed,
    /// Payment never completed.
    Failed,
    Refunded,
    Expired,
}

impl OrderStatus {
    /// Forward-only transition table. Nothing ever returns to `Pending`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Paid, Fulfilled)
                | (Paid, FulfillmentFailed)
                | (Paid, Refunded)
                | (Paid, Expired)
                | (FulfillmentFailed, Fulfilled)
                | (FulfillmentFailed, Refunded)
                | (Fulfilled, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Fulfilled | OrderStatus::Failed | OrderStatus::Refunded | OrderStatus::Expired
        )
    }

    /// Statuses that count as a redemption of the order's coupon.
    pub fn consumes_coupon(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::Fulfilled
                | OrderStatus::FulfillmentFailed
                | OrderStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::FulfillmentFailed => "fulfillment_failed",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "fulfilled" => Ok(OrderStatus::Fulfilled),
            "fulfillment_failed" => Ok(OrderStatus::FulfillmentFailed),
            "failed" => Ok(OrderStatus::Failed),
            "refunded" => Ok(OrderStatus::Refunded),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A purchase of one or more data packages for a ship.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub ship_id: Uuid,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub allocations: Vec<Allocation>,
    pub subtotal_usd: Decimal,
    pub discount_usd: Decimal,
    pub total_usd: Decimal,
    pub loyalty_percent: Decimal,
    pub coupon_id: Option<Uuid>,
    pub payment_reference: Option<String>,
    /// Set when the coupon's usage limit was exhausted between validation and payment.
    pub needs_reconciliation: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(user_id: String, ship_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            ship_id,
            status: OrderStatus::Pending,
            items: Vec::new(),
            allocations: Vec::new(),
            subtotal_usd: Decimal::ZERO,
            discount_usd: Decimal::ZERO,
            total_usd: Decimal::ZERO,
            loyalty_percent: Decimal::ZERO,
            coupon_id: None,
            payment_reference: None,
            needs_reconciliation: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    /// Add an item and grow the subtotal. Totals are settled by `apply_pricing`.
    pub fn add_item(&mut self, plan_id: Uuid, quantity: i32, unit_price_usd: Decimal) {
        let item = OrderItem::new(self.id, plan_id, quantity, unit_price_usd);
        self.subtotal_usd += item.line_total();
        self.total_usd = self.subtotal_usd - self.discount_usd;
        self.items.push(item);
        self.updated_at = Utc::now();
    }

    /// Record a priced total. `discount_usd` is derived so that
    /// `total_usd == max(0, subtotal_usd - discount_usd)` holds exactly.
    pub fn apply_pricing(&mut self, coupon_id: Option<Uuid>, loyalty_percent: Decimal, total_usd: Decimal) {
        self.coupon_id = coupon_id;
        self.loyalty_percent = loyalty_percent;
        self.total_usd = total_usd;
        self.discount_usd = self.subtotal_usd - total_usd;
        self.updated_at = Utc::now();
    }

    pub fn plan_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.items.iter().map(|item| item.plan_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Total number of credentials this order needs.
    pub fn units(&self) -> i64 {
        self.items.iter().map(|item| item.quantity as i64).sum()
    }

    /// Allocations whose credential is still bound to this order.
    pub fn active_allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter().filter(|a| a.released_at.is_none())
    }
}

/// One line of an order. Each unit of `quantity` needs its own credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub plan_id: Uuid,
    pub quantity: i32,
    pub unit_price_usd: Decimal,
}

impl OrderItem {
    pub fn new(order_id: Uuid, plan_id: Uuid, quantity: i32, unit_price_usd: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            plan_id,
            quantity,
            unit_price_usd,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price_usd * Decimal::from(self.quantity)
    }
}

/// Order-side record of a claimed credential
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub plan_id: Uuid,
    pub credential_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Allocation {
    pub fn new(order_id: Uuid, order_item_id: Uuid, plan_id: Uuid, credential_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            order_item_id,
            plan_id,
            credential_id,
            created_at: Utc::now(),
            released_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transitions_are_forward_only() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Fulfilled));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::FulfillmentFailed));
        assert!(OrderStatus::FulfillmentFailed.can_transition_to(OrderStatus::Fulfilled));
        assert!(OrderStatus::Fulfilled.can_transition_to(OrderStatus::Refunded));

        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Fulfilled));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Fulfilled));
        assert!(!OrderStatus::Expired.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Fulfilled,
            OrderStatus::FulfillmentFailed,
            OrderStatus::Failed,
            OrderStatus::Refunded,
            OrderStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_totals_follow_items_and_pricing() {
        let mut order = Order::new("user-1".into(), Uuid::new_v4());
        order.add_item(Uuid::new_v4(), 2, dec!(49.99));
        order.add_item(Uuid::new_v4(), 1, dec!(20));
        assert_eq!(order.subtotal_usd, dec!(119.98));
        assert_eq!(order.units(), 3);

        order.apply_pricing(None, dec!(5), dec!(113.98));
        assert_eq!(order.discount_usd, dec!(6.00));
        assert_eq!(order.total_usd, order.subtotal_usd - order.discount_usd);
    }
}
