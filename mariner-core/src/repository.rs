use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mariner_shared::{Allocation, Coupon, Credential, NewCredential, Order, OrderStatus, Plan, PoolStats};
use uuid::Uuid;

/// Errors surfaced by every storage backend.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record in use: {0}")]
    InUse(String),

    /// A compare-and-set precondition no longer held (e.g. the order left the expected status).
    #[error("Stale state: {0}")]
    Stale(String),

    /// Serialization failure or deadlock. Safe to retry.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RepoError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Conflict(_))
    }
}

/// Outcome of atomically taking one use of a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSlot {
    Claimed { used_count: i32 },
    /// `used_count` already reached `max_uses`; nothing was written.
    Exhausted,
    /// Single-use coupon the user already redeemed on another order; nothing was written.
    AlreadyRedeemed,
}

impl UsageSlot {
    /// The order was paid without a valid use of its coupon.
    pub fn needs_reconciliation(self) -> bool {
        !matches!(self, UsageSlot::Claimed { .. })
    }
}

/// Result of the `pending -> paid` unit of work.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub order: Order,
    /// `None` when the order carries no coupon.
    pub usage: Option<UsageSlot>,
}

/// Repository trait for the plan catalog
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn create_plan(&self, plan: &Plan) -> Result<(), RepoError>;

    async fn get_plan(&self, id: Uuid) -> Result<Option<Plan>, RepoError>;

    async fn list_plans(&self, active_only: bool) -> Result<Vec<Plan>, RepoError>;
}

/// Repository trait for per-plan credential pools
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert one credential. `Duplicate` if the username already exists in the plan.
    async fn insert_credential(
        &self,
        plan_id: Uuid,
        credential: &NewCredential,
    ) -> Result<Credential, RepoError>;

    /// Atomically flip one unassigned credential of the plan to assigned.
    /// `Ok(None)` means the pool is empty; two callers never receive the same row.
    async fn claim_one(
        &self,
        plan_id: Uuid,
        order_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Credential>, RepoError>;

    /// Clear the assignment. Returns false when the credential was already available.
    async fn release(&self, credential_id: Uuid) -> Result<bool, RepoError>;

    /// Clear the assignment only while the credential is bound to `order_id`.
    /// Returns false when it is available or bound to another order.
    async fn release_for_order(&self, credential_id: Uuid, order_id: Uuid) -> Result<bool, RepoError>;

    async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, RepoError>;

    async fn list_by_plan(&self, plan_id: Uuid) -> Result<Vec<Credential>, RepoError>;

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Credential>, RepoError>;

    async fn stats(&self, plan_id: Uuid) -> Result<PoolStats, RepoError>;

    /// `InUse` while the credential is assigned.
    async fn delete_credential(&self, id: Uuid) -> Result<(), RepoError>;
}

/// Repository trait for coupons
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// `Duplicate` if another coupon has the same code ignoring case.
    async fn create_coupon(&self, coupon: &Coupon) -> Result<(), RepoError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepoError>;

    async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>, RepoError>;

    async fn list_coupons(&self) -> Result<Vec<Coupon>, RepoError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), RepoError>;

    /// Increment `used_count` only if it stays within `max_uses`.
    async fn claim_usage_slot(&self, coupon_id: Uuid) -> Result<UsageSlot, RepoError>;
}

/// Repository trait for orders
///
/// Every status change is a compare-and-set on the current status; a lost race
/// surfaces as `RepoError::Stale`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<(), RepoError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError>;

    async fn list_orders(&self, user_id: &str) -> Result<Vec<Order>, RepoError>;

    /// Orders still in `status` that were created before the cutoff.
    async fn list_stale(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepoError>;

    /// Orders of this user that redeemed the coupon, ignoring `exclude_order`.
    async fn count_coupon_redemptions(
        &self,
        user_id: &str,
        coupon_id: Uuid,
        exclude_order: Option<Uuid>,
    ) -> Result<i64, RepoError>;

    /// Persist re-priced totals and coupon. Only valid while the order is pending.
    async fn update_pricing(&self, order: &Order) -> Result<(), RepoError>;

    /// `pending -> paid` and, when the order has a coupon, its usage slot claim,
    /// in one unit of work.
    async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_reference: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentConfirmation, RepoError>;

    /// `from -> fulfilled` together with the allocation records.
    async fn record_fulfillment(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        allocations: &[Allocation],
    ) -> Result<Order, RepoError>;

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<&str>,
    ) -> Result<Order, RepoError>;

    /// Stamp `released_at` on the order's allocations for these credentials.
    async fn release_allocations(
        &self,
        order_id: Uuid,
        credential_ids: &[Uuid],
        released_at: DateTime<Utc>,
    ) -> Result<(), RepoError>;
}
