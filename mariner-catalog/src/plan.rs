use mariner_core::repository::{PlanRepository, RepoError};
use mariner_shared::Plan;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Admin input for a new plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlan {
    pub name: String,
    pub data_limit_gb: i32,
    pub price_usd: Decimal,
    pub validity_days: i32,
}

pub struct PlanCatalog {
    plans: Arc<dyn PlanRepository>,
}

impl PlanCatalog {
    pub fn new(plans: Arc<dyn PlanRepository>) -> Self {
        Self { plans }
    }

    pub async fn create(&self, input: NewPlan) -> Result<Plan, PlanError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(PlanError::Invalid("name is required".into()));
        }
        if input.data_limit_gb <= 0 {
            return Err(PlanError::Invalid("dataLimitGb must be positive".into()));
        }
        if input.price_usd < Decimal::ZERO {
            return Err(PlanError::Invalid("priceUsd cannot be negative".into()));
        }
        if input.validity_days <= 0 {
            return Err(PlanError::Invalid("validityDays must be positive".into()));
        }

        let plan = Plan::new(
            name.to_string(),
            input.data_limit_gb,
            input.price_usd.round_dp(2),
            input.validity_days,
        );
        self.plans.create_plan(&plan).await?;
        info!(plan_id = %plan.id, name = %plan.name, "Plan created");
        Ok(plan)
    }

    pub async fn get(&self, id: Uuid) -> Result<Plan, PlanError> {
        self.plans.get_plan(id).await?.ok_or(PlanError::NotFound(id))
    }

    /// A plan that exists and is on sale.
    pub async fn get_active(&self, id: Uuid) -> Result<Plan, PlanError> {
        let plan = self.get(id).await?;
        if !plan.is_active {
            return Err(PlanError::Inactive(id));
        }
        Ok(plan)
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<Plan>, PlanError> {
        Ok(self.plans.list_plans(active_only).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Plan not found: {0}")]
    NotFound(Uuid),

    #[error("Plan is not on sale: {0}")]
    Inactive(Uuid),

    #[error("Invalid plan: {0}")]
    Invalid(String),

    #[error(transparent)]
    Repository(#[from] RepoError),
}
