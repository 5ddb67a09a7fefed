use chrono::{DateTime, Duration, Utc};
use mariner_catalog::{
    CredentialPool, DiscountComposer, LoyaltyProgram, LoyaltyStatus, PlanCatalog, PlanError, PoolError,
};
use mariner_core::repository::{OrderRepository, RepoError, UsageSlot};
use mariner_core::EventPublisher;
use mariner_coupon::{CouponError, CouponPolicy, RejectionReason, ValidationContext};
use mariner_shared::models::events::{
    CouponOverdrawnEvent, DomainEvent, FulfillmentFailedEvent, OrderFulfilledEvent, OrderPaidEvent,
    OrderRefundedEvent,
};
use mariner_shared::{Order, OrderStatus};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::fulfillment::{AllocationCoordinator, AllocationOutcome};
use crate::models::{CartRequest, ExpirySummary, OrderView, Quote, QuoteLine};

/// Order lifecycle limits.
#[derive(Debug, Clone, Copy)]
pub struct OrderSettings {
    /// How long unfinished orders may sit before the expiry sweep closes them.
    pub pending_ttl: Duration,
    pub paid_ttl: Duration,
    /// Upper bound on credentials a single cart may request.
    pub max_units_per_order: u32,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::minutes(30),
            paid_ttl: Duration::minutes(120),
            max_units_per_order: 100,
        }
    }
}

/// Drives orders through their lifecycle and keeps orders, coupons and
/// credential pools in agreement at every transition.
pub struct OrderManager {
    orders: Arc<dyn OrderRepository>,
    plans: Arc<PlanCatalog>,
    coupons: Arc<CouponPolicy>,
    pool: Arc<CredentialPool>,
    coordinator: AllocationCoordinator,
    loyalty: LoyaltyProgram,
    events: Arc<dyn EventPublisher>,
    settings: OrderSettings,
}

impl OrderManager {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        plans: Arc<PlanCatalog>,
        coupons: Arc<CouponPolicy>,
        pool: Arc<CredentialPool>,
        loyalty: LoyaltyProgram,
        events: Arc<dyn EventPublisher>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            orders,
            plans,
            coupons,
            coordinator: AllocationCoordinator::new(pool.clone()),
            pool,
            loyalty,
            events,
            settings,
        }
    }

    /// Price a cart without persisting anything. An invalid coupon is
    /// reported in the quote and contributes no discount.
    pub async fn quote(&self, user_id: &str, cart: &CartRequest) -> Result<Quote, OrderError> {
        if cart.items.is_empty() {
            return Err(OrderError::Validation("cart has no items".into()));
        }

        let max_units = i64::from(self.settings.max_units_per_order);
        let mut lines = Vec::with_capacity(cart.items.len());
        let mut subtotal = Decimal::ZERO;
        let mut units: i64 = 0;
        for line in &cart.items {
            if line.quantity < 1 {
                return Err(OrderError::Validation(format!(
                    "quantity for plan {} must be at least 1",
                    line.plan_id
                )));
            }
            units += i64::from(line.quantity);
            if units > max_units {
                return Err(OrderError::Validation(format!(
                    "an order may hold at most {} units",
                    max_units
                )));
            }
            let plan = self.plans.get_active(line.plan_id).await?;
            let line_total = plan.price_usd * Decimal::from(line.quantity);
            subtotal += line_total;
            lines.push(QuoteLine {
                plan_id: plan.id,
                plan_name: plan.name,
                quantity: line.quantity,
                unit_price_usd: plan.price_usd,
                line_total_usd: line_total,
            });
        }

        let coupon = match &cart.coupon_code {
            Some(code) => {
                let plan_ids = lines.iter().map(|l| l.plan_id).collect();
                let ctx = ValidationContext::new(user_id, cart.ship_id, subtotal, plan_ids);
                Some(self.coupons.validate(code, &ctx).await?)
            }
            None => None,
        };
        let coupon_discount = coupon
            .as_ref()
            .filter(|v| v.valid)
            .and_then(|v| v.discount_amount)
            .unwrap_or(Decimal::ZERO);

        let loyalty = self.loyalty_status(user_id).await?;
        let composed = DiscountComposer::compose(subtotal, coupon_discount, loyalty.current_discount);

        Ok(Quote {
            lines,
            subtotal_usd: subtotal,
            coupon_discount_usd: coupon_discount,
            loyalty_percent: loyalty.current_discount,
            loyalty_discount_usd: composed.loyalty_amount,
            total_discount_usd: composed.total_discount,
            total_usd: composed.total,
            coupon,
        })
    }

    /// Persist a `pending` order for the cart. A rejected coupon fails the request.
    pub async fn create_order(&self, user_id: &str, cart: &CartRequest) -> Result<Order, OrderError> {
        let quote = self.quote(user_id, cart).await?;
        if let Some(reason) = quote.coupon.as_ref().and_then(|v| v.reason_code) {
            return Err(OrderError::CouponRejected(reason));
        }

        let mut order = Order::new(user_id.to_string(), cart.ship_id);
        for line in &quote.lines {
            order.add_item(line.plan_id, line.quantity, line.unit_price_usd);
        }
        order.apply_pricing(quote.applied_coupon_id(), quote.loyalty_percent, quote.total_usd);

        self.orders.create_order(&order).await?;
        info!(
            order_id = %order.id,
            user_id = %user_id,
            total_usd = %order.total_usd,
            "Order created"
        );
        Ok(order)
    }

    /// `pending -> paid`.
    ///
    /// A coupon code supplied here is applied (and the order re-priced) when
    /// the order has none yet; otherwise it must name the order's coupon.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_reference: &str,
        coupon_code: Option<&str>,
    ) -> Result<Order, OrderError> {
        let payment_reference = payment_reference.trim();
        if payment_reference.is_empty() {
            return Err(OrderError::Validation("paymentReference is required".into()));
        }

        let mut order = self.get(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }

        if let Some(code) = coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            self.attach_coupon(&mut order, code).await?;
        }

        self.coordinator.verify_consistency(&order).await?;

        let confirmation = self
            .orders
            .confirm_payment(order.id, payment_reference, Utc::now())
            .await
            .map_err(|e| stale_as_transition(e, order.status, OrderStatus::Paid))?;
        let order = confirmation.order;

        match (confirmation.usage, order.coupon_id) {
            (Some(UsageSlot::Exhausted), Some(coupon_id)) => {
                warn!(
                    order_id = %order.id,
                    coupon_id = %coupon_id,
                    "Coupon limit reached after validation, order flagged for reconciliation"
                );
                self.publish(DomainEvent::CouponOverdrawn(CouponOverdrawnEvent {
                    coupon_id,
                    order_id: order.id,
                    timestamp: Utc::now().timestamp(),
                }))
                .await;
            }
            (Some(UsageSlot::AlreadyRedeemed), Some(coupon_id)) => {
                warn!(
                    order_id = %order.id,
                    coupon_id = %coupon_id,
                    user_id = %order.user_id,
                    "Single-use coupon already redeemed by this user, order flagged for reconciliation"
                );
                self.publish(DomainEvent::CouponOverdrawn(CouponOverdrawnEvent {
                    coupon_id,
                    order_id: order.id,
                    timestamp: Utc::now().timestamp(),
                }))
                .await;
            }
            (Some(UsageSlot::Claimed { used_count }), Some(coupon_id)) => {
                debug!(order_id = %order.id, coupon_id = %coupon_id, used_count, "Coupon usage recorded");
            }
            _ => {}
        }

        info!(order_id = %order.id, payment_reference = %payment_reference, "Order paid");
        self.publish(DomainEvent::OrderPaid(OrderPaidEvent {
            order_id: order.id,
            user_id: order.user_id.clone(),
            coupon_id: order.coupon_id,
            total_usd: order.total_usd,
            needs_reconciliation: order.needs_reconciliation,
            timestamp: Utc::now().timestamp(),
        }))
        .await;

        Ok(order)
    }

    async fn attach_coupon(&self, order: &mut Order, code: &str) -> Result<(), OrderError> {
        if let Some(coupon_id) = order.coupon_id {
            let coupon = self.coupons.get(coupon_id).await?;
            if !coupon.matches_code(code) {
                return Err(OrderError::Validation(format!(
                    "coupon {} does not match the coupon already on the order",
                    code
                )));
            }
            return Ok(());
        }

        let ctx = ValidationContext::new(
            order.user_id.clone(),
            order.ship_id,
            order.subtotal_usd,
            order.plan_ids(),
        )
        .excluding(order.id);
        let validation = self.coupons.validate(code, &ctx).await?;

        match (validation.coupon, validation.discount_amount) {
            (Some(coupon), Some(discount)) if validation.valid => {
                let composed = DiscountComposer::compose(order.subtotal_usd, discount, order.loyalty_percent);
                order.apply_pricing(Some(coupon.id), order.loyalty_percent, composed.total);
                self.orders
                    .update_pricing(order)
                    .await
                    .map_err(|e| stale_as_transition(e, OrderStatus::Pending, OrderStatus::Paid))?;
                info!(order_id = %order.id, coupon_id = %coupon.id, total_usd = %order.total_usd, "Coupon applied at payment");
                Ok(())
            }
            _ => Err(OrderError::CouponRejected(
                validation.reason_code.unwrap_or(RejectionReason::NotFound),
            )),
        }
    }

    /// `paid | fulfillment_failed -> fulfilled`, or `paid -> fulfillment_failed`
    /// when a plan runs out. Returns the order in its resulting state.
    pub async fn fulfill(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::FulfillmentFailed) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Fulfilled,
            });
        }

        self.coordinator.verify_consistency(&order).await?;

        match self.coordinator.allocate(&order).await? {
            AllocationOutcome::Allocated(allocations) => {
                let fulfilled = match self
                    .orders
                    .record_fulfillment(order.id, order.status, &allocations)
                    .await
                {
                    Ok(fulfilled) => fulfilled,
                    Err(e) => {
                        warn!(order_id = %order.id, "Could not record fulfillment, releasing claims: {}", e);
                        self.coordinator.rollback(order.id, &allocations).await?;
                        return Err(stale_as_transition(e, order.status, OrderStatus::Fulfilled));
                    }
                };

                self.coordinator.verify_consistency(&fulfilled).await?;

                info!(order_id = %fulfilled.id, credentials = allocations.len(), "Order fulfilled");
                self.publish(DomainEvent::OrderFulfilled(OrderFulfilledEvent {
                    order_id: fulfilled.id,
                    user_id: fulfilled.user_id.clone(),
                    credential_ids: allocations.iter().map(|a| a.credential_id).collect(),
                    timestamp: Utc::now().timestamp(),
                }))
                .await;
                Ok(fulfilled)
            }
            AllocationOutcome::Shortfall { plan_id, released } => {
                let reason = format!("insufficient stock for plan {}", plan_id);
                let failed = if order.status == OrderStatus::Paid {
                    self.orders
                        .transition(order.id, OrderStatus::Paid, OrderStatus::FulfillmentFailed, Some(&reason))
                        .await
                        .map_err(|e| stale_as_transition(e, order.status, OrderStatus::FulfillmentFailed))?
                } else {
                    order
                };

                warn!(order_id = %failed.id, plan_id = %plan_id, released, "Fulfillment failed: {}", reason);
                self.publish(DomainEvent::FulfillmentFailed(FulfillmentFailedEvent {
                    order_id: failed.id,
                    plan_id,
                    released,
                    timestamp: Utc::now().timestamp(),
                }))
                .await;
                Ok(failed)
            }
        }
    }

    /// Payment confirmation followed by fulfillment.
    ///
    /// Repeating the call with the same payment reference resumes a paid
    /// order or returns an already fulfilled one unchanged.
    pub async fn complete(
        &self,
        order_id: Uuid,
        payment_reference: &str,
        coupon_code: Option<&str>,
    ) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        let same_payment = order.payment_reference.as_deref() == Some(payment_reference.trim());

        match order.status {
            OrderStatus::Pending => {
                self.confirm_payment(order_id, payment_reference, coupon_code).await?;
                self.fulfill(order_id).await
            }
            OrderStatus::Paid if same_payment => self.fulfill(order_id).await,
            OrderStatus::Fulfilled if same_payment => Ok(order),
            status => Err(OrderError::InvalidTransition {
                from: status,
                to: OrderStatus::Paid,
            }),
        }
    }

    /// `fulfillment_failed -> fulfilled` once stock has been replenished.
    pub async fn retry_fulfillment(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        if order.status != OrderStatus::FulfillmentFailed {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Fulfilled,
            });
        }
        info!(order_id = %order_id, "Retrying fulfillment");
        self.fulfill(order_id).await
    }

    /// `pending -> failed`.
    pub async fn mark_payment_failed(&self, order_id: Uuid, reason: &str) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        self.coordinator.verify_consistency(&order).await?;

        let failed = self
            .orders
            .transition(order.id, OrderStatus::Pending, OrderStatus::Failed, Some(reason))
            .await
            .map_err(|e| stale_as_transition(e, order.status, OrderStatus::Failed))?;
        info!(order_id = %order_id, "Payment failed: {}", reason);
        Ok(failed)
    }

    /// `paid | fulfilled | fulfillment_failed -> refunded`, returning every
    /// bound credential to its pool. The coupon use is not given back.
    pub async fn refund(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Refunded) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Refunded,
            });
        }

        self.coordinator.verify_consistency(&order).await?;

        // Credentials go back first; the status only moves once nothing is left bound.
        let credential_ids: Vec<Uuid> = order.active_allocations().map(|a| a.credential_id).collect();
        let report = self.coordinator.release_credentials(order.id, &credential_ids).await;
        if !report.settled.is_empty() {
            self.orders
                .release_allocations(order.id, &report.settled, Utc::now())
                .await?;
        }
        if let Some(e) = report.error {
            warn!(
                order_id = %order_id,
                released = report.released,
                pending = credential_ids.len() - report.settled.len(),
                "Refund interrupted, order keeps its status for a retry"
            );
            return Err(e.into());
        }
        let released = report.released;

        let refunded = self
            .orders
            .transition(order.id, order.status, OrderStatus::Refunded, Some("refunded"))
            .await
            .map_err(|e| stale_as_transition(e, order.status, OrderStatus::Refunded))?;
        self.coordinator.verify_consistency(&refunded).await?;

        info!(order_id = %order_id, released, "Order refunded");
        self.publish(DomainEvent::OrderRefunded(OrderRefundedEvent {
            order_id,
            released,
            timestamp: Utc::now().timestamp(),
        }))
        .await;
        Ok(refunded)
    }

    /// `pending | paid -> expired`.
    pub async fn expire(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Expired) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Expired,
            });
        }
        self.coordinator.verify_consistency(&order).await?;

        let expired = self
            .orders
            .transition(order.id, order.status, OrderStatus::Expired, Some("expired"))
            .await
            .map_err(|e| stale_as_transition(e, order.status, OrderStatus::Expired))?;
        info!(order_id = %order_id, from = %order.status, "Order expired");
        Ok(expired)
    }

    /// Expire pending and paid orders older than their TTL. Orders that move
    /// on concurrently are skipped.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<ExpirySummary, OrderError> {
        let mut summary = ExpirySummary::default();

        let sweeps = [
            (OrderStatus::Pending, now - self.settings.pending_ttl),
            (OrderStatus::Paid, now - self.settings.paid_ttl),
        ];
        for (status, cutoff) in sweeps {
            for order in self.orders.list_stale(status, cutoff).await? {
                match self.expire(order.id).await {
                    Ok(_) if status == OrderStatus::Pending => summary.expired_pending += 1,
                    Ok(_) => summary.expired_paid += 1,
                    Err(OrderError::InvalidTransition { from, .. }) => {
                        debug!(order_id = %order.id, status = %from, "Order moved on before expiry");
                    }
                    Err(e) => error!(order_id = %order.id, "Failed to expire order: {}", e),
                }
            }
        }

        if summary.total() > 0 {
            info!(
                expired_pending = summary.expired_pending,
                expired_paid = summary.expired_paid,
                "Expiry sweep finished"
            );
        }
        Ok(summary)
    }

    /// Admin override: free one credential and close its allocation record.
    pub async fn unassign_credential(&self, credential_id: Uuid) -> Result<bool, OrderError> {
        let credential = self.pool.get(credential_id).await?;
        let order_id = credential.assigned_to_order_id;

        let released = self.pool.release(credential_id).await?;
        if let Some(order_id) = order_id {
            self.orders
                .release_allocations(order_id, &[credential_id], Utc::now())
                .await?;
            warn!(credential_id = %credential_id, order_id = %order_id, "Credential unassigned by admin");
        }
        Ok(released)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    /// The order with its credentials, visible only to its owner.
    pub async fn view_for_user(&self, order_id: Uuid, user_id: &str) -> Result<OrderView, OrderError> {
        let order = self.get(order_id).await?;
        if order.user_id != user_id {
            return Err(OrderError::NotFound(order_id));
        }
        self.view(order).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<OrderView>, OrderError> {
        let orders = self.orders.list_orders(user_id).await?;
        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            views.push(self.view(order).await?);
        }
        Ok(views)
    }

    async fn view(&self, order: Order) -> Result<OrderView, OrderError> {
        let credentials = if order.status == OrderStatus::Fulfilled {
            self.pool.list_by_order(order.id).await?
        } else {
            Vec::new()
        };
        Ok(OrderView { order, credentials })
    }

    /// Tier from the user's lifetime spend on fulfilled orders.
    pub async fn loyalty_status(&self, user_id: &str) -> Result<LoyaltyStatus, OrderError> {
        let lifetime_spend: Decimal = self
            .orders
            .list_orders(user_id)
            .await?
            .iter()
            .filter(|o| o.status == OrderStatus::Fulfilled)
            .map(|o| o.total_usd)
            .sum();
        Ok(self.loyalty.status_for(lifetime_spend))
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(&event).await {
            error!(topic = event.topic(), key = %event.key(), "Failed to publish event: {}", e);
        }
    }
}

fn stale_as_transition(err: RepoError, from: OrderStatus, to: OrderStatus) -> OrderError {
    match err {
        RepoError::Stale(_) => OrderError::InvalidTransition { from, to },
        other => other.into(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid order: {0}")]
    Validation(String),

    #[error("Coupon rejected: {0}")]
    CouponRejected(RejectionReason),

    #[error("Consistency violation on order {order_id}: {detail}")]
    Consistency { order_id: Uuid, detail: String },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CartLine;
    use mariner_catalog::NewPlan;
    use mariner_core::InMemoryPublisher;
    use mariner_coupon::NewCoupon;
    use mariner_shared::DiscountType;
    use mariner_store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Harness {
        manager: OrderManager,
        catalog: Arc<PlanCatalog>,
        coupons: Arc<CouponPolicy>,
        pool: Arc<CredentialPool>,
    }

    fn harness(loyalty: LoyaltyProgram) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(PlanCatalog::new(store.clone()));
        let coupons = Arc::new(CouponPolicy::new(store.clone(), store.clone()));
        let pool = Arc::new(CredentialPool::new(store.clone(), store.clone(), 3));
        let manager = OrderManager::new(
            store,
            catalog.clone(),
            coupons.clone(),
            pool.clone(),
            loyalty,
            Arc::new(InMemoryPublisher::new()),
            OrderSettings::default(),
        );
        Harness { manager, catalog, coupons, pool }
    }

    async fn plan(h: &Harness, price: Decimal) -> Uuid {
        h.catalog
            .create(NewPlan {
                name: "Ocean".into(),
                data_limit_gb: 10,
                price_usd: price,
                validity_days: 30,
            })
            .await
            .unwrap()
            .id
    }

    fn cart(plan_id: Uuid, quantity: i32, coupon: Option<&str>) -> CartRequest {
        CartRequest {
            ship_id: Uuid::new_v4(),
            items: vec![CartLine { plan_id, quantity }],
            coupon_code: coupon.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_quote_reports_rejected_coupon_without_discount() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(50)).await;

        let quote = h.manager.quote("user-1", &cart(plan_id, 2, Some("NOPE"))).await.unwrap();
        assert_eq!(quote.subtotal_usd, dec!(100));
        assert_eq!(quote.total_usd, dec!(100));
        let coupon = quote.coupon.unwrap();
        assert!(!coupon.valid);
        assert_eq!(coupon.reason_code, Some(RejectionReason::NotFound));

        let result = h.manager.create_order("user-1", &cart(plan_id, 2, Some("NOPE"))).await;
        assert!(matches!(result, Err(OrderError::CouponRejected(RejectionReason::NotFound))));
    }

    #[tokio::test]
    async fn test_rejects_bad_carts() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(50)).await;

        let empty = CartRequest { ship_id: Uuid::new_v4(), items: vec![], coupon_code: None };
        assert!(matches!(h.manager.quote("u", &empty).await, Err(OrderError::Validation(_))));
        assert!(matches!(
            h.manager.quote("u", &cart(plan_id, 0, None)).await,
            Err(OrderError::Validation(_))
        ));
        assert!(matches!(
            h.manager.quote("u", &cart(Uuid::new_v4(), 1, None)).await,
            Err(OrderError::Plan(PlanError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_unit_cap_bounds_each_line_and_the_cart() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(10)).await;
        let max = OrderSettings::default().max_units_per_order as i32;

        assert!(h.manager.quote("u", &cart(plan_id, max, None)).await.is_ok());
        assert!(matches!(
            h.manager.create_order("u", &cart(plan_id, i32::MAX, None)).await,
            Err(OrderError::Validation(_))
        ));

        // Lines that fit alone still count towards one total
        let split = CartRequest {
            ship_id: Uuid::new_v4(),
            items: vec![
                CartLine { plan_id, quantity: max },
                CartLine { plan_id, quantity: 1 },
            ],
            coupon_code: None,
        };
        assert!(matches!(h.manager.quote("u", &split).await, Err(OrderError::Validation(_))));
    }

    #[tokio::test]
    async fn test_coupon_supplied_at_payment_reprices_order() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(100)).await;
        h.pool.create(plan_id, "alpha", "pw").await.unwrap();
        h.coupons
            .create(NewCoupon::new("LATE20", DiscountType::Percentage, dec!(20)))
            .await
            .unwrap();

        let order = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();
        assert_eq!(order.total_usd, dec!(100));

        let done = h.manager.complete(order.id, "pay_1", Some("late20")).await.unwrap();
        assert_eq!(done.status, OrderStatus::Fulfilled);
        assert_eq!(done.total_usd, dec!(80));
        assert_eq!(done.discount_usd, dec!(20));
        assert!(done.coupon_id.is_some());
    }

    #[tokio::test]
    async fn test_rejected_coupon_at_payment_leaves_order_pending() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(100)).await;
        let order = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();

        let result = h.manager.complete(order.id, "pay_1", Some("MISSING")).await;
        assert!(matches!(result, Err(OrderError::CouponRejected(RejectionReason::NotFound))));
        assert_eq!(h.manager.get(order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent_per_payment_reference() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(10)).await;
        h.pool.create(plan_id, "alpha", "pw").await.unwrap();

        let order = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();
        let first = h.manager.complete(order.id, "pay_1", None).await.unwrap();
        let again = h.manager.complete(order.id, "pay_1", None).await.unwrap();
        assert_eq!(first.status, OrderStatus::Fulfilled);
        assert_eq!(again.allocations.len(), 1);

        let other = h.manager.complete(order.id, "pay_2", None).await;
        assert!(matches!(other, Err(OrderError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_loyalty_grows_with_fulfilled_spend() {
        let h = harness(LoyaltyProgram::new(vec![mariner_catalog::LoyaltyTier {
            name: "Silver".into(),
            min_spend_usd: dec!(100),
            discount_percent: dec!(5),
        }]));
        let plan_id = plan(&h, dec!(100)).await;
        h.pool.bulk_import(plan_id, "a,1\nb,2").await.unwrap();

        assert_eq!(h.manager.loyalty_status("user-1").await.unwrap().current_discount, dec!(0));

        let first = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();
        h.manager.complete(first.id, "pay_1", None).await.unwrap();

        let status = h.manager.loyalty_status("user-1").await.unwrap();
        assert_eq!(status.current_tier.as_deref(), Some("Silver"));

        let second = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();
        assert_eq!(second.loyalty_percent, dec!(5));
        assert_eq!(second.total_usd, dec!(95));
    }

    #[tokio::test]
    async fn test_expire_stale_only_touches_old_orders() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(10)).await;
        let order = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();

        let summary = h.manager.expire_stale(Utc::now()).await.unwrap();
        assert_eq!(summary.total(), 0);

        let later = Utc::now() + Duration::minutes(31);
        let summary = h.manager.expire_stale(later).await.unwrap();
        assert_eq!(summary.expired_pending, 1);
        assert_eq!(h.manager.get(order.id).await.unwrap().status, OrderStatus::Expired);

        assert!(matches!(
            h.manager.complete(order.id, "pay_1", None).await,
            Err(OrderError::InvalidTransition { from: OrderStatus::Expired, .. })
        ));
    }

    #[tokio::test]
    async fn test_payment_failure() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(10)).await;
        let order = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();

        let failed = h.manager.mark_payment_failed(order.id, "card declined").await.unwrap();
        assert_eq!(failed.status, OrderStatus::Failed);
        assert!(matches!(
            h.manager.mark_payment_failed(order.id, "again").await,
            Err(OrderError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.manager.refund(order.id).await,
            Err(OrderError::InvalidTransition { from: OrderStatus::Failed, to: OrderStatus::Refunded })
        ));
    }

    #[tokio::test]
    async fn test_view_hidden_from_other_users() {
        let h = harness(LoyaltyProgram::default());
        let plan_id = plan(&h, dec!(10)).await;
        h.pool.create(plan_id, "alpha", "pw").await.unwrap();
        let order = h.manager.create_order("user-1", &cart(plan_id, 1, None)).await.unwrap();
        h.manager.complete(order.id, "pay_1", None).await.unwrap();

        let view = h.manager.view_for_user(order.id, "user-1").await.unwrap();
        assert_eq!(view.credentials.len(), 1);
        assert_eq!(view.credentials[0].username, "alpha");

        assert!(matches!(
            h.manager.view_for_user(order.id, "user-2").await,
            Err(OrderError::NotFound(_))
        ));
    }
}
