use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mariner_core::repository::{CredentialRepository, RepoError};
use mariner_shared::pii::Masked;
use mariner_shared::{Credential, NewCredential, PoolStats};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_sqlx;

pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> Result<bool, RepoError> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM credential_pool WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(found.is_some())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    plan_id: Uuid,
    username: String,
    password: String,
    is_assigned: bool,
    assigned_to_order_id: Option<Uuid>,
    assigned_to_user_id: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        Credential {
            id: row.id,
            plan_id: row.plan_id,
            username: row.username,
            password: Masked(row.password),
            is_assigned: row.is_assigned,
            assigned_to_order_id: row.assigned_to_order_id,
            assigned_to_user_id: row.assigned_to_user_id,
            assigned_at: row.assigned_at,
            created_at: row.created_at,
        }
    }
}

const CREDENTIAL_COLUMNS: &str = "id, plan_id, username, password, is_assigned, \
    assigned_to_order_id, assigned_to_user_id, assigned_at, created_at";

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn insert_credential(
        &self,
        plan_id: Uuid,
        credential: &NewCredential,
    ) -> Result<Credential, RepoError> {
        let row: CredentialRow = sqlx::query_as(&format!(
            "INSERT INTO credential_pool (id, plan_id, username, password) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            CREDENTIAL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(plan_id)
        .bind(&credential.username)
        .bind(&credential.password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match map_sqlx(e) {
            RepoError::Duplicate(_) => RepoError::Duplicate(format!(
                "username {} already exists in plan {}",
                credential.username, plan_id
            )),
            other => other,
        })?;
        Ok(row.into())
    }

    async fn claim_one(
        &self,
        plan_id: Uuid,
        order_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Credential>, RepoError> {
        // Locked rows are skipped rather than waited on, so concurrent claimers
        // each walk to a different free row.
        let row: Option<CredentialRow> = sqlx::query_as(&format!(
            r#"
            UPDATE credential_pool
            SET is_assigned = TRUE,
                assigned_to_order_id = $2,
                assigned_to_user_id = $3,
                assigned_at = NOW()
            WHERE id = (
                SELECT id FROM credential_pool
                WHERE plan_id = $1 AND NOT is_assigned
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            CREDENTIAL_COLUMNS
        ))
        .bind(plan_id)
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(row.map(Credential::from))
    }

    async fn release(&self, credential_id: Uuid) -> Result<bool, RepoError> {
        let released: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE credential_pool
            SET is_assigned = FALSE,
                assigned_to_order_id = NULL,
                assigned_to_user_id = NULL,
                assigned_at = NULL
            WHERE id = $1 AND is_assigned
            RETURNING id
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if released.is_some() {
            return Ok(true);
        }
        if self.exists(credential_id).await? {
            Ok(false)
        } else {
            Err(RepoError::NotFound(format!("credential {}", credential_id)))
        }
    }

    async fn release_for_order(&self, credential_id: Uuid, order_id: Uuid) -> Result<bool, RepoError> {
        let released: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE credential_pool
            SET is_assigned = FALSE,
                assigned_to_order_id = NULL,
                assigned_to_user_id = NULL,
                assigned_at = NULL
            WHERE id = $1 AND is_assigned AND assigned_to_order_id = $2
            RETURNING id
            "#,
        )
        .bind(credential_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if released.is_some() {
            return Ok(true);
        }
        if self.exists(credential_id).await? {
            Ok(false)
        } else {
            Err(RepoError::NotFound(format!("credential {}", credential_id)))
        }
    }

    async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, RepoError> {
        let row: Option<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {} FROM credential_pool WHERE id = $1",
            CREDENTIAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(row.map(Credential::from))
    }

    async fn list_by_plan(&self, plan_id: Uuid) -> Result<Vec<Credential>, RepoError> {
        let rows: Vec<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {} FROM credential_pool WHERE plan_id = $1 ORDER BY created_at, id",
            CREDENTIAL_COLUMNS
        ))
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Credential::from).collect())
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Credential>, RepoError> {
        let rows: Vec<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {} FROM credential_pool WHERE is_assigned AND assigned_to_order_id = $1 \
             ORDER BY assigned_at, id",
            CREDENTIAL_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Credential::from).collect())
    }

    async fn stats(&self, plan_id: Uuid) -> Result<PoolStats, RepoError> {
        let (total, assigned): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_assigned) FROM credential_pool WHERE plan_id = $1",
        )
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(PoolStats {
            plan_id,
            total,
            available: total - assigned,
            assigned,
        })
    }

    async fn delete_credential(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM credential_pool WHERE id = $1 AND NOT is_assigned")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.exists(id).await? {
            Err(RepoError::InUse(format!("credential {} is assigned", id)))
        } else {
            Err(RepoError::NotFound(format!("credential {}", id)))
        }
    }
}
