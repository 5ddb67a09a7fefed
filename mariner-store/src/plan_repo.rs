use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mariner_core::repository::{PlanRepository, RepoError};
use mariner_shared::Plan;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_sqlx;

pub struct PgPlanRepository {
    pool: PgPool,
}

impl PgPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    data_limit_gb: i32,
    price_usd: Decimal,
    validity_days: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            id: row.id,
            name: row.name,
            data_limit_gb: row.data_limit_gb,
            price_usd: row.price_usd,
            validity_days: row.validity_days,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

const PLAN_COLUMNS: &str = "id, name, data_limit_gb, price_usd, validity_days, is_active, created_at";

#[async_trait]
impl PlanRepository for PgPlanRepository {
    async fn create_plan(&self, plan: &Plan) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO plans (id, name, data_limit_gb, price_usd, validity_days, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.data_limit_gb)
        .bind(plan.price_usd)
        .bind(plan.validity_days)
        .bind(plan.is_active)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<Plan>, RepoError> {
        let row: Option<PlanRow> =
            sqlx::query_as(&format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(Plan::from))
    }

    async fn list_plans(&self, active_only: bool) -> Result<Vec<Plan>, RepoError> {
        let rows: Vec<PlanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE ($1 = FALSE OR is_active) ORDER BY name",
            PLAN_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Plan::from).collect())
    }
}
