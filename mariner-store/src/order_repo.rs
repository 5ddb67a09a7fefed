use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mariner_core::repository::{OrderRepository, PaymentConfirmation, RepoError, UsageSlot};
use mariner_shared::{Allocation, Order, OrderItem, OrderStatus};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::coupon_repo::claim_usage_slot;
use crate::database::{corrupt, map_sqlx};

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    ship_id: Uuid,
    status: String,
    subtotal_usd: Decimal,
    discount_usd: Decimal,
    total_usd: Decimal,
    loyalty_percent: Decimal,
    coupon_id: Option<Uuid>,
    payment_reference: Option<String>,
    needs_reconciliation: bool,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    plan_id: Uuid,
    quantity: i32,
    unit_price_usd: Decimal,
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: Uuid,
    order_id: Uuid,
    order_item_id: Uuid,
    plan_id: Uuid,
    credential_id: Uuid,
    created_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

const ORDER_COLUMNS: &str = "id, user_id, ship_id, status, subtotal_usd, discount_usd, total_usd, \
    loyalty_percent, coupon_id, payment_reference, needs_reconciliation, failure_reason, \
    created_at, updated_at, paid_at";

fn parse_status(raw: &str) -> Result<OrderStatus, RepoError> {
    raw.parse().map_err(|e| corrupt("order status", e))
}

/// Attach items and allocations to a batch of order rows.
async fn hydrate(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepoError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let item_rows: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT id, order_id, plan_id, quantity, unit_price_usd FROM order_items \
         WHERE order_id = ANY($1) ORDER BY order_id, id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    let allocation_rows: Vec<AllocationRow> = sqlx::query_as(
        "SELECT id, order_id, order_item_id, plan_id, credential_id, created_at, released_at \
         FROM order_allocations WHERE order_id = ANY($1) ORDER BY created_at, id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for row in item_rows {
        items.entry(row.order_id).or_default().push(OrderItem {
            id: row.id,
            order_id: row.order_id,
            plan_id: row.plan_id,
            quantity: row.quantity,
            unit_price_usd: row.unit_price_usd,
        });
    }

    let mut allocations: HashMap<Uuid, Vec<Allocation>> = HashMap::new();
    for row in allocation_rows {
        allocations.entry(row.order_id).or_default().push(Allocation {
            id: row.id,
            order_id: row.order_id,
            order_item_id: row.order_item_id,
            plan_id: row.plan_id,
            credential_id: row.credential_id,
            created_at: row.created_at,
            released_at: row.released_at,
        });
    }

    rows.into_iter()
        .map(|row| {
            Ok(Order {
                id: row.id,
                status: parse_status(&row.status)?,
                items: items.remove(&row.id).unwrap_or_default(),
                allocations: allocations.remove(&row.id).unwrap_or_default(),
                user_id: row.user_id,
                ship_id: row.ship_id,
                subtotal_usd: row.subtotal_usd,
                discount_usd: row.discount_usd,
                total_usd: row.total_usd,
                loyalty_percent: row.loyalty_percent,
                coupon_id: row.coupon_id,
                payment_reference: row.payment_reference,
                needs_reconciliation: row.needs_reconciliation,
                failure_reason: row.failure_reason,
                created_at: row.created_at,
                updated_at: row.updated_at,
                paid_at: row.paid_at,
            })
        })
        .collect()
}

async fn load_order(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>, RepoError> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx)?;

    match row {
        Some(row) => Ok(hydrate(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

fn redeemed_statuses() -> Vec<String> {
    [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Fulfilled,
        OrderStatus::FulfillmentFailed,
        OrderStatus::Failed,
        OrderStatus::Refunded,
        OrderStatus::Expired,
    ]
    .iter()
    .filter(|s| s.consumes_coupon())
    .map(|s| s.as_str().to_string())
    .collect()
}

async fn count_redemptions(
    conn: &mut PgConnection,
    user_id: &str,
    coupon_id: Uuid,
    exclude_order: Option<Uuid>,
) -> Result<i64, RepoError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM orders \
         WHERE user_id = $1 AND coupon_id = $2 AND status = ANY($3) \
         AND ($4::uuid IS NULL OR id <> $4)",
    )
    .bind(user_id)
    .bind(coupon_id)
    .bind(redeemed_statuses())
    .bind(exclude_order)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Ok(count)
}

/// Takes one use of the coupon for a locked pending order.
///
/// The coupon row stays locked until commit, so payments sharing a coupon
/// count single-use redemptions one at a time.
async fn take_coupon_use(conn: &mut PgConnection, order_id: Uuid, coupon_id: Uuid) -> Result<UsageSlot, RepoError> {
    let coupon: Option<(bool,)> = sqlx::query_as("SELECT single_use_only FROM coupons WHERE id = $1 FOR UPDATE")
        .bind(coupon_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    let (single_use,) = coupon.ok_or_else(|| RepoError::NotFound(format!("coupon {}", coupon_id)))?;

    if single_use {
        let user_id: (String,) = sqlx::query_as("SELECT user_id FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx)?;
        if count_redemptions(conn, &user_id.0, coupon_id, Some(order_id)).await? > 0 {
            return Ok(UsageSlot::AlreadyRedeemed);
        }
    }

    claim_usage_slot(conn, coupon_id).await
}

/// Row-lock the order and return its status and coupon.
async fn lock_order(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<(OrderStatus, Option<Uuid>), RepoError> {
    let row: Option<(String, Option<Uuid>)> =
        sqlx::query_as("SELECT status, coupon_id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx)?;

    let (status, coupon_id) = row.ok_or_else(|| RepoError::NotFound(format!("order {}", id)))?;
    Ok((parse_status(&status)?, coupon_id))
}

fn stale(id: Uuid, current: OrderStatus, expected: OrderStatus, to: OrderStatus) -> RepoError {
    RepoError::Stale(format!(
        "order {} is {}, expected {} before moving to {}",
        id, current, expected, to
    ))
}

async fn insert_allocations(
    conn: &mut PgConnection,
    allocations: &[Allocation],
) -> Result<(), RepoError> {
    for allocation in allocations {
        sqlx::query(
            "INSERT INTO order_allocations (id, order_id, order_item_id, plan_id, credential_id, created_at, released_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(allocation.id)
        .bind(allocation.order_id)
        .bind(allocation.order_item_id)
        .bind(allocation.plan_id)
        .bind(allocation.credential_id)
        .bind(allocation.created_at)
        .bind(allocation.released_at)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    }
    Ok(())
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create_order(&self, order: &Order) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, ship_id, status, subtotal_usd, discount_usd, total_usd,
                loyalty_percent, coupon_id, payment_reference, needs_reconciliation, failure_reason,
                created_at, updated_at, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(&order.user_id)
        .bind(order.ship_id)
        .bind(order.status.as_str())
        .bind(order.subtotal_usd)
        .bind(order.discount_usd)
        .bind(order.total_usd)
        .bind(order.loyalty_percent)
        .bind(order.coupon_id)
        .bind(&order.payment_reference)
        .bind(order.needs_reconciliation)
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, plan_id, quantity, unit_price_usd) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.plan_id)
            .bind(item.quantity)
            .bind(item.unit_price_usd)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        insert_allocations(&mut tx, &order.allocations).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        load_order(&mut conn, id).await
    }

    async fn list_orders(&self, user_id: &str) -> Result<Vec<Order>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx)?;
        hydrate(&mut conn, rows).await
    }

    async fn list_stale(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE status = $1 AND created_at < $2 ORDER BY created_at",
            ORDER_COLUMNS
        ))
        .bind(status.as_str())
        .bind(created_before)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx)?;
        hydrate(&mut conn, rows).await
    }

    async fn count_coupon_redemptions(
        &self,
        user_id: &str,
        coupon_id: Uuid,
        exclude_order: Option<Uuid>,
    ) -> Result<i64, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        count_redemptions(&mut conn, user_id, coupon_id, exclude_order).await
    }

    async fn update_pricing(&self, order: &Order) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET coupon_id = $2, loyalty_percent = $3, subtotal_usd = $4, discount_usd = $5,
                total_usd = $6, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(order.id)
        .bind(order.coupon_id)
        .bind(order.loyalty_percent)
        .bind(order.subtotal_usd)
        .bind(order.discount_usd)
        .bind(order.total_usd)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get_order(order.id).await? {
            Some(stored) => Err(RepoError::Stale(format!(
                "order {} is {}, pricing is frozen",
                stored.id, stored.status
            ))),
            None => Err(RepoError::NotFound(format!("order {}", order.id))),
        }
    }

    async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_reference: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentConfirmation, RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let (status, coupon_id) = lock_order(&mut tx, order_id).await?;
        if status != OrderStatus::Pending {
            return Err(stale(order_id, status, OrderStatus::Pending, OrderStatus::Paid));
        }

        let usage = match coupon_id {
            Some(coupon_id) => Some(take_coupon_use(&mut tx, order_id, coupon_id).await?),
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', paid_at = $2, payment_reference = $3,
                needs_reconciliation = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(paid_at)
        .bind(payment_reference)
        .bind(usage.is_some_and(UsageSlot::needs_reconciliation))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let order = load_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(PaymentConfirmation { order, usage })
    }

    async fn record_fulfillment(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        allocations: &[Allocation],
    ) -> Result<Order, RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let (status, _) = lock_order(&mut tx, order_id).await?;
        if status != from || !from.can_transition_to(OrderStatus::Fulfilled) {
            return Err(stale(order_id, status, from, OrderStatus::Fulfilled));
        }

        insert_allocations(&mut tx, allocations).await?;

        sqlx::query(
            "UPDATE orders SET status = 'fulfilled', failure_reason = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let order = load_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(order)
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<&str>,
    ) -> Result<Order, RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let (status, _) = lock_order(&mut tx, order_id).await?;
        if status != from || !from.can_transition_to(to) {
            return Err(stale(order_id, status, from, to));
        }

        sqlx::query(
            "UPDATE orders SET status = $2, failure_reason = COALESCE($3, failure_reason), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(order_id)
        .bind(to.as_str())
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let order = load_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(order)
    }

    async fn release_allocations(
        &self,
        order_id: Uuid,
        credential_ids: &[Uuid],
        released_at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE order_allocations SET released_at = $3 \
             WHERE order_id = $1 AND credential_id = ANY($2) AND released_at IS NULL",
        )
        .bind(order_id)
        .bind(credential_ids)
        .bind(released_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("UPDATE orders SET updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}
