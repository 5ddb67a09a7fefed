use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub coupon_id: Option<Uuid>,
    pub total_usd: Decimal,
    pub needs_reconciliation: bool,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderFulfilledEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub credential_ids: Vec<Uuid>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct FulfillmentFailedEvent {
    pub order_id: Uuid,
    pub plan_id: Uuid,
    pub released: usize,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderRefundedEvent {
    pub order_id: Uuid,
    pub released: usize,
    pub timestamp: i64,
}

/// A paid order whose coupon had no usage slot left at confirmation time.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct CouponOverdrawnEvent {
    pub coupon_id: Uuid,
    pub order_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPaid(OrderPaidEvent),
    OrderFulfilled(OrderFulfilledEvent),
    FulfillmentFailed(FulfillmentFailedEvent),
    OrderRefunded(OrderRefundedEvent),
    CouponOverdrawn(CouponOverdrawnEvent),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::OrderPaid(_) => "orders.paid",
            DomainEvent::OrderFulfilled(_) => "orders.fulfilled",
            DomainEvent::FulfillmentFailed(_) => "orders.fulfillment_failed",
            DomainEvent::OrderRefunded(_) => "orders.refunded",
            DomainEvent::CouponOverdrawn(_) => "coupons.overdrawn",
        }
    }

    /// Partition key. Events for one order stay ordered.
    pub fn key(&self) -> Uuid {
        match self {
            DomainEvent::OrderPaid(e) => e.order_id,
            DomainEvent::OrderFulfilled(e) => e.order_id,
            DomainEvent::FulfillmentFailed(e) => e.order_id,
            DomainEvent::OrderRefunded(e) => e.order_id,
            DomainEvent::CouponOverdrawn(e) => e.order_id,
        }
    }
}
