use std::sync::Arc;

use mariner_catalog::{CredentialPool, LoyaltyProgram, LoyaltyTier, PlanCatalog};
use mariner_core::{CouponRepository, CredentialRepository, EventPublisher, OrderRepository, PlanRepository};
use mariner_coupon::CouponPolicy;
use mariner_order::{OrderManager, OrderSettings};
use mariner_store::app_config::BusinessRules;
use mariner_store::{
    DbClient, MemoryStore, PgCouponRepository, PgCredentialRepository, PgOrderRepository, PgPlanRepository,
    RedisClient,
};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

/// The four storage seams, backed either by one `MemoryStore` or by Postgres.
#[derive(Clone)]
pub struct Repositories {
    pub plans: Arc<dyn PlanRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub coupons: Arc<dyn CouponRepository>,
    pub orders: Arc<dyn OrderRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            plans: store.clone(),
            credentials: store.clone(),
            coupons: store.clone(),
            orders: store,
        }
    }

    pub fn postgres(db: &DbClient) -> Self {
        Self {
            plans: Arc::new(PgPlanRepository::new(db.pool.clone())),
            credentials: Arc::new(PgCredentialRepository::new(db.pool.clone())),
            coupons: Arc::new(PgCouponRepository::new(db.pool.clone())),
            orders: Arc::new(PgOrderRepository::new(db.pool.clone())),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub plans: Arc<PlanCatalog>,
    pub coupons: Arc<CouponPolicy>,
    pub pool: Arc<CredentialPool>,
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

impl AppState {
    pub fn new(
        repos: Repositories,
        events: Arc<dyn EventPublisher>,
        redis: Option<Arc<RedisClient>>,
        auth: AuthConfig,
        business_rules: BusinessRules,
    ) -> Self {
        let plans = Arc::new(PlanCatalog::new(repos.plans.clone()));
        let coupons = Arc::new(CouponPolicy::new(repos.coupons.clone(), repos.orders.clone()));
        let pool = Arc::new(CredentialPool::new(
            repos.credentials.clone(),
            repos.plans.clone(),
            business_rules.max_claim_retries,
        ));

        let loyalty = LoyaltyProgram::new(
            business_rules
                .loyalty_tiers
                .iter()
                .map(|t| LoyaltyTier {
                    name: t.name.clone(),
                    min_spend_usd: t.min_spend_usd,
                    discount_percent: t.discount_percent,
                })
                .collect(),
        );
        let settings = OrderSettings {
            pending_ttl: chrono::Duration::minutes(business_rules.pending_order_ttl_minutes),
            paid_ttl: chrono::Duration::minutes(business_rules.paid_order_ttl_minutes),
            max_units_per_order: business_rules.max_units_per_order,
        };

        let orders = Arc::new(OrderManager::new(
            repos.orders,
            plans.clone(),
            coupons.clone(),
            pool.clone(),
            loyalty,
            events,
            settings,
        ));

        Self {
            orders,
            plans,
            coupons,
            pool,
            redis,
            auth,
            business_rules,
        }
    }
}
