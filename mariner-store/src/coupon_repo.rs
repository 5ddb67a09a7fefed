use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mariner_core::repository::{CouponRepository, RepoError, UsageSlot};
use mariner_shared::Coupon;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{corrupt, map_sqlx};

pub struct PgCouponRepository {
    pool: PgPool,
}

impl PgCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    description: Option<String>,
    discount_type: String,
    discount_value: Decimal,
    min_order_amount: Option<Decimal>,
    max_uses: Option<i32>,
    used_count: i32,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    scope: String,
    applicable_ships: Vec<Uuid>,
    applicable_plans: Vec<Uuid>,
    single_use_only: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = RepoError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        Ok(Coupon {
            id: row.id,
            code: row.code,
            description: row.description,
            discount_type: row
                .discount_type
                .parse()
                .map_err(|e| corrupt("discount_type", e))?,
            discount_value: row.discount_value,
            min_order_amount: row.min_order_amount,
            max_uses: row.max_uses,
            used_count: row.used_count,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            scope: row.scope.parse().map_err(|e| corrupt("scope", e))?,
            applicable_ships: row.applicable_ships,
            applicable_plans: row.applicable_plans,
            single_use_only: row.single_use_only,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COUPON_COLUMNS: &str = "id, code, description, discount_type, discount_value, min_order_amount, \
    max_uses, used_count, valid_from, valid_until, scope, applicable_ships, applicable_plans, \
    single_use_only, is_active, created_at, updated_at";

#[async_trait]
impl CouponRepository for PgCouponRepository {
    async fn create_coupon(&self, coupon: &Coupon) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, description, discount_type, discount_value, min_order_amount,
                max_uses, used_count, valid_from, valid_until, scope, applicable_ships, applicable_plans,
                single_use_only, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(coupon.discount_type.as_str())
        .bind(coupon.discount_value)
        .bind(coupon.min_order_amount)
        .bind(coupon.max_uses)
        .bind(coupon.used_count)
        .bind(coupon.valid_from)
        .bind(coupon.valid_until)
        .bind(coupon.scope.as_str())
        .bind(&coupon.applicable_ships)
        .bind(&coupon.applicable_plans)
        .bind(coupon.single_use_only)
        .bind(coupon.is_active)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match map_sqlx(e) {
            RepoError::Duplicate(_) => RepoError::Duplicate(format!("coupon code {}", coupon.code)),
            other => other,
        })?;
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepoError> {
        let row: Option<CouponRow> = sqlx::query_as(&format!(
            "SELECT {} FROM coupons WHERE LOWER(code) = LOWER($1)",
            COUPON_COLUMNS
        ))
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(Coupon::try_from).transpose()
    }

    async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>, RepoError> {
        let row: Option<CouponRow> =
            sqlx::query_as(&format!("SELECT {} FROM coupons WHERE id = $1", COUPON_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(Coupon::try_from).transpose()
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>, RepoError> {
        let rows: Vec<CouponRow> = sqlx::query_as(&format!(
            "SELECT {} FROM coupons ORDER BY created_at DESC",
            COUPON_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(Coupon::try_from).collect()
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE coupons SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("coupon {}", id)));
        }
        Ok(())
    }

    async fn claim_usage_slot(&self, coupon_id: Uuid) -> Result<UsageSlot, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        claim_usage_slot(&mut conn, coupon_id).await
    }
}

/// Conditional increment; shared with the payment transaction.
pub(crate) async fn claim_usage_slot(
    conn: &mut sqlx::PgConnection,
    coupon_id: Uuid,
) -> Result<UsageSlot, RepoError> {
    let claimed: Option<(i32,)> = sqlx::query_as(
        r#"
        UPDATE coupons
        SET used_count = used_count + 1, updated_at = NOW()
        WHERE id = $1 AND (max_uses IS NULL OR used_count < max_uses)
        RETURNING used_count
        "#,
    )
    .bind(coupon_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    if let Some((used_count,)) = claimed {
        return Ok(UsageSlot::Claimed { used_count });
    }

    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM coupons WHERE id = $1")
        .bind(coupon_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;

    match exists {
        Some(_) => Ok(UsageSlot::Exhausted),
        None => Err(RepoError::NotFound(format!("coupon {}", coupon_id))),
    }
}
