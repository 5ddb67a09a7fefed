use mariner_core::repository::{CredentialRepository, PlanRepository, RepoError};
use mariner_shared::{Credential, NewCredential, Plan, PoolStats};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a bulk import. Rejected lines never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success_count: usize,
    pub errors: Vec<String>,
}

/// Outcome of claiming one credential. An empty pool is a business outcome.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Credential),
    NotAvailable,
}

/// Live stock of one plan, as shown to customers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAvailability {
    #[serde(flatten)]
    pub plan: Plan,
    pub plan_id: Uuid,
    pub available_count: i64,
    pub in_stock: bool,
}

/// Credential pool service: imports, claims, releases and counts per-plan stock.
pub struct CredentialPool {
    credentials: Arc<dyn CredentialRepository>,
    plans: Arc<dyn PlanRepository>,
    max_retries: u32,
}

impl CredentialPool {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        plans: Arc<dyn PlanRepository>,
        max_retries: u32,
    ) -> Self {
        Self {
            credentials,
            plans,
            max_retries,
        }
    }

    async fn require_plan(&self, plan_id: Uuid) -> Result<Plan, PoolError> {
        self.plans
            .get_plan(plan_id)
            .await?
            .ok_or(PoolError::PlanNotFound(plan_id))
    }

    /// Import `username,password` lines. Whitespace-only lines are skipped;
    /// line numbers in errors are 1-based positions in `text`.
    pub async fn bulk_import(&self, plan_id: Uuid, text: &str) -> Result<ImportReport, PoolError> {
        self.require_plan(plan_id).await?;

        let mut report = ImportReport::default();
        let mut seen = HashSet::new();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            if raw.trim().is_empty() {
                continue;
            }

            let credential = match parse_line(raw) {
                Ok(credential) => credential,
                Err(reason) => {
                    report.errors.push(format!("line {}: {}", line_no, reason));
                    continue;
                }
            };

            if !seen.insert(credential.username.clone()) {
                report.errors.push(format!(
                    "line {}: duplicate username '{}' in this import",
                    line_no, credential.username
                ));
                continue;
            }

            match self.credentials.insert_credential(plan_id, &credential).await {
                Ok(_) => report.success_count += 1,
                Err(RepoError::Duplicate(_)) => report.errors.push(format!(
                    "line {}: username '{}' already exists for this plan",
                    line_no, credential.username
                )),
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            plan_id = %plan_id,
            imported = report.success_count,
            rejected = report.errors.len(),
            "Credential import finished"
        );
        Ok(report)
    }

    /// Add a single credential.
    pub async fn create(&self, plan_id: Uuid, username: &str, password: &str) -> Result<Credential, PoolError> {
        self.require_plan(plan_id).await?;

        let credential = NewCredential {
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        };
        if credential.username.is_empty() || credential.password.is_empty() {
            return Err(PoolError::Invalid("username and password are required".into()));
        }

        match self.credentials.insert_credential(plan_id, &credential).await {
            Ok(created) => Ok(created),
            Err(RepoError::Duplicate(msg)) => Err(PoolError::Duplicate(msg)),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim one free credential for the order.
    ///
    /// Write conflicts are retried up to `max_retries` times, then reported
    /// as `NotAvailable`.
    pub async fn claim_one(&self, plan_id: Uuid, order_id: Uuid, user_id: &str) -> Result<ClaimOutcome, PoolError> {
        let mut attempt = 0;
        loop {
            match self.credentials.claim_one(plan_id, order_id, user_id).await {
                Ok(Some(credential)) => return Ok(ClaimOutcome::Claimed(credential)),
                Ok(None) => return Ok(ClaimOutcome::NotAvailable),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(plan_id = %plan_id, attempt, "Claim conflict, retrying: {}", e);
                }
                Err(e) if e.is_retryable() => {
                    warn!(plan_id = %plan_id, "Claim conflict persisted after {} retries: {}", attempt, e);
                    return Ok(ClaimOutcome::NotAvailable);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Return a credential to the pool. Releasing an available credential is a no-op.
    pub async fn release(&self, credential_id: Uuid) -> Result<bool, PoolError> {
        match self.credentials.release(credential_id).await {
            Ok(released) => Ok(released),
            Err(RepoError::NotFound(_)) => Err(PoolError::CredentialNotFound(credential_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Return a credential to the pool if it is still bound to `order_id`.
    pub async fn release_for_order(&self, credential_id: Uuid, order_id: Uuid) -> Result<bool, PoolError> {
        match self.credentials.release_for_order(credential_id, order_id).await {
            Ok(released) => Ok(released),
            Err(RepoError::NotFound(_)) => Err(PoolError::CredentialNotFound(credential_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stats(&self, plan_id: Uuid) -> Result<PoolStats, PoolError> {
        self.require_plan(plan_id).await?;
        Ok(self.credentials.stats(plan_id).await?)
    }

    pub async fn delete(&self, credential_id: Uuid) -> Result<(), PoolError> {
        match self.credentials.delete_credential(credential_id).await {
            Ok(()) => {
                info!(credential_id = %credential_id, "Credential deleted");
                Ok(())
            }
            Err(RepoError::NotFound(_)) => Err(PoolError::CredentialNotFound(credential_id)),
            Err(RepoError::InUse(_)) => Err(PoolError::CredentialAssigned(credential_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, credential_id: Uuid) -> Result<Credential, PoolError> {
        self.credentials
            .get_credential(credential_id)
            .await?
            .ok_or(PoolError::CredentialNotFound(credential_id))
    }

    pub async fn list(&self, plan_id: Uuid) -> Result<Vec<Credential>, PoolError> {
        self.require_plan(plan_id).await?;
        Ok(self.credentials.list_by_plan(plan_id).await?)
    }

    pub async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Credential>, PoolError> {
        Ok(self.credentials.list_by_order(order_id).await?)
    }

    /// Active plans with their current free stock.
    pub async fn plan_availability(&self) -> Result<Vec<PlanAvailability>, PoolError> {
        let plans = self.plans.list_plans(true).await?;
        let mut availability = Vec::with_capacity(plans.len());
        for plan in plans {
            let stats = self.credentials.stats(plan.id).await?;
            availability.push(PlanAvailability {
                plan_id: plan.id,
                available_count: stats.available,
                in_stock: stats.in_stock(),
                plan,
            });
        }
        Ok(availability)
    }
}

fn parse_line(raw: &str) -> Result<NewCredential, String> {
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    match fields.as_slice() {
        [username, password] if !username.is_empty() && !password.is_empty() => Ok(NewCredential {
            username: username.to_string(),
            password: password.to_string(),
        }),
        [_, _] => Err("username and password must both be non-empty".into()),
        _ => Err(format!(
            "expected 'username,password', found {} field(s)",
            fields.len()
        )),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Credential not found: {0}")]
    CredentialNotFound(Uuid),

    #[error("Credential {0} is assigned and cannot be deleted")]
    CredentialAssigned(Uuid),

    #[error("Duplicate credential: {0}")]
    Duplicate(String),

    #[error("Invalid credential: {0}")]
    Invalid(String),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mariner_store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn setup() -> (CredentialPool, Plan) {
        let store = Arc::new(MemoryStore::new());
        let plan = Plan::new("Ocean 10GB".into(), 10, dec!(49.99), 30);
        store.create_plan(&plan).await.unwrap();
        (CredentialPool::new(store.clone(), store, 3), plan)
    }

    #[tokio::test]
    async fn test_bulk_import_partial_success() {
        let (pool, plan) = setup().await;

        let report = pool
            .bulk_import(plan.id, "alpha,pw1\nbroken-line\ngamma,pw3")
            .await
            .unwrap();

        assert_eq!(report.success_count, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("line 2: "), "{}", report.errors[0]);

        let stats = pool.stats(plan.id).await.unwrap();
        assert_eq!((stats.total, stats.available, stats.assigned), (2, 2, 0));
    }

    #[tokio::test]
    async fn test_bulk_import_rejects_duplicates_and_skips_blank_lines() {
        let (pool, plan) = setup().await;
        pool.create(plan.id, "alpha", "pw").await.unwrap();

        let report = pool
            .bulk_import(plan.id, "alpha,new\n   \nbeta,pw\nbeta,again\n,pw\na,b,c")
            .await
            .unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.errors.len(), 4);
        assert!(report.errors[0].starts_with("line 1: "));
        assert!(report.errors[1].starts_with("line 4: "));
        assert!(report.errors[2].starts_with("line 5: "));
        assert!(report.errors[3].starts_with("line 6: "));

        // The stored password was not overwritten
        let stored = pool.list(plan.id).await.unwrap();
        let alpha = stored.iter().find(|c| c.username == "alpha").unwrap();
        assert_eq!(alpha.password.expose(), "pw");
    }

    #[tokio::test]
    async fn test_bulk_import_unknown_plan() {
        let (pool, _) = setup().await;
        let result = pool.bulk_import(Uuid::new_v4(), "alpha,pw").await;
        assert!(matches!(result, Err(PoolError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn test_claim_until_empty() {
        let (pool, plan) = setup().await;
        pool.create(plan.id, "alpha", "pw").await.unwrap();

        let order_id = Uuid::new_v4();
        match pool.claim_one(plan.id, order_id, "user-1").await.unwrap() {
            ClaimOutcome::Claimed(c) => assert!(c.is_assigned_to(order_id)),
            ClaimOutcome::NotAvailable => panic!("expected a credential"),
        }
        assert!(matches!(
            pool.claim_one(plan.id, Uuid::new_v4(), "user-2").await.unwrap(),
            ClaimOutcome::NotAvailable
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_while_assigned() {
        let (pool, plan) = setup().await;
        let credential = pool.create(plan.id, "alpha", "pw").await.unwrap();
        pool.claim_one(plan.id, Uuid::new_v4(), "user-1").await.unwrap();

        assert!(matches!(
            pool.delete(credential.id).await,
            Err(PoolError::CredentialAssigned(_))
        ));

        assert!(pool.release(credential.id).await.unwrap());
        assert!(!pool.release(credential.id).await.unwrap());
        pool.delete(credential.id).await.unwrap();
        assert!(matches!(
            pool.release(credential.id).await,
            Err(PoolError::CredentialNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_release_for_order_leaves_other_orders_alone() {
        let (pool, plan) = setup().await;
        let credential = pool.create(plan.id, "alpha", "pw").await.unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        pool.claim_one(plan.id, first, "user-1").await.unwrap();
        assert!(pool.release(credential.id).await.unwrap());
        pool.claim_one(plan.id, second, "user-2").await.unwrap();

        // The earlier owner no longer holds it
        assert!(!pool.release_for_order(credential.id, first).await.unwrap());
        assert!(pool.get(credential.id).await.unwrap().is_assigned_to(second));

        assert!(pool.release_for_order(credential.id, second).await.unwrap());
        assert!(!pool.release_for_order(credential.id, second).await.unwrap());
        assert!(matches!(
            pool.release_for_order(Uuid::new_v4(), second).await,
            Err(PoolError::CredentialNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_availability() {
        let (pool, plan) = setup().await;
        pool.bulk_import(plan.id, "a,1\nb,2").await.unwrap();
        pool.claim_one(plan.id, Uuid::new_v4(), "user-1").await.unwrap();

        let availability = pool.plan_availability().await.unwrap();
        assert_eq!(availability.len(), 1);
        assert_eq!(availability[0].plan_id, plan.id);
        assert_eq!(availability[0].available_count, 1);
        assert!(availability[0].in_stock);
    }

    /// Fails with a write conflict a fixed number of times before delegating.
    struct Flaky {
        inner: MemoryStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl CredentialRepository for Flaky {
        async fn insert_credential(&self, plan_id: Uuid, c: &NewCredential) -> Result<Credential, RepoError> {
            self.inner.insert_credential(plan_id, c).await
        }
        async fn claim_one(&self, plan_id: Uuid, order_id: Uuid, user_id: &str) -> Result<Option<Credential>, RepoError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Err(RepoError::Conflict("could not serialize access".into()));
            }
            self.inner.claim_one(plan_id, order_id, user_id).await
        }
        async fn release(&self, id: Uuid) -> Result<bool, RepoError> {
            self.inner.release(id).await
        }
        async fn release_for_order(&self, id: Uuid, order_id: Uuid) -> Result<bool, RepoError> {
            self.inner.release_for_order(id, order_id).await
        }
        async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, RepoError> {
            self.inner.get_credential(id).await
        }
        async fn list_by_plan(&self, plan_id: Uuid) -> Result<Vec<Credential>, RepoError> {
            self.inner.list_by_plan(plan_id).await
        }
        async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Credential>, RepoError> {
            self.inner.list_by_order(order_id).await
        }
        async fn stats(&self, plan_id: Uuid) -> Result<PoolStats, RepoError> {
            self.inner.stats(plan_id).await
        }
        async fn delete_credential(&self, id: Uuid) -> Result<(), RepoError> {
            self.inner.delete_credential(id).await
        }
    }

    #[tokio::test]
    async fn test_claim_retries_conflicts() {
        let plans = Arc::new(MemoryStore::new());
        let plan = Plan::new("Ocean 10GB".into(), 10, dec!(49.99), 30);
        plans.create_plan(&plan).await.unwrap();

        let flaky = Arc::new(Flaky {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(2),
        });
        let pool = CredentialPool::new(flaky.clone(), plans.clone(), 3);
        pool.create(plan.id, "alpha", "pw").await.unwrap();

        assert!(matches!(
            pool.claim_one(plan.id, Uuid::new_v4(), "user-1").await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));

        // Persistent conflicts surface as an empty pool, not an error
        flaky.conflicts.store(10, Ordering::SeqCst);
        pool.create(plan.id, "beta", "pw").await.unwrap();
        assert!(matches!(
            pool.claim_one(plan.id, Uuid::new_v4(), "user-2").await.unwrap(),
            ClaimOutcome::NotAvailable
        ));
    }
}
