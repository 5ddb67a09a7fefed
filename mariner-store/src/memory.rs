use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mariner_core::repository::{
    CouponRepository, CredentialRepository, OrderRepository, PaymentConfirmation, PlanRepository,
    RepoError, UsageSlot,
};
use mariner_shared::{
    Allocation, Coupon, Credential, NewCredential, Order, OrderStatus, Plan, PoolStats,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Credentials of one plan, in insertion order. Claims take the oldest free row.
#[derive(Default)]
struct PlanPool {
    credentials: Vec<Credential>,
}

/// Process-local backend for every repository trait.
///
/// Each plan's pool sits behind its own mutex, so claims serialize per plan and
/// never across plans. `confirm_payment` takes the order map lock before the
/// coupon map lock; nothing takes them in the opposite order.
#[derive(Default)]
pub struct MemoryStore {
    plans: RwLock<HashMap<Uuid, Plan>>,
    pools: RwLock<HashMap<Uuid, Arc<Mutex<PlanPool>>>>,
    credential_plans: RwLock<HashMap<Uuid, Uuid>>,
    coupons: Mutex<HashMap<Uuid, Coupon>>,
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pool(&self, plan_id: Uuid) -> Arc<Mutex<PlanPool>> {
        if let Some(pool) = self.pools.read().await.get(&plan_id) {
            return pool.clone();
        }
        self.pools
            .write()
            .await
            .entry(plan_id)
            .or_default()
            .clone()
    }

    async fn pool_of_credential(&self, credential_id: Uuid) -> Result<Arc<Mutex<PlanPool>>, RepoError> {
        let plan_id = self
            .credential_plans
            .read()
            .await
            .get(&credential_id)
            .copied()
            .ok_or_else(|| RepoError::NotFound(format!("credential {}", credential_id)))?;
        Ok(self.pool(plan_id).await)
    }
}

fn take_usage_slot(coupons: &mut HashMap<Uuid, Coupon>, coupon_id: Uuid) -> Result<UsageSlot, RepoError> {
    let coupon = coupons
        .get_mut(&coupon_id)
        .ok_or_else(|| RepoError::NotFound(format!("coupon {}", coupon_id)))?;

    if !coupon.has_uses_left() {
        return Ok(UsageSlot::Exhausted);
    }

    coupon.used_count += 1;
    coupon.updated_at = Utc::now();
    Ok(UsageSlot::Claimed {
        used_count: coupon.used_count,
    })
}

fn redemptions(
    orders: &HashMap<Uuid, Order>,
    user_id: &str,
    coupon_id: Uuid,
    exclude_order: Option<Uuid>,
) -> usize {
    orders
        .values()
        .filter(|o| {
            o.user_id == user_id
                && o.coupon_id == Some(coupon_id)
                && o.status.consumes_coupon()
                && Some(o.id) != exclude_order
        })
        .count()
}

fn stale(order: &Order, expected: OrderStatus, to: OrderStatus) -> RepoError {
    RepoError::Stale(format!(
        "order {} is {}, expected {} before moving to {}",
        order.id, order.status, expected, to
    ))
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn create_plan(&self, plan: &Plan) -> Result<(), RepoError> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(RepoError::Duplicate(format!("plan {}", plan.id)));
        }
        plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<Plan>, RepoError> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn list_plans(&self, active_only: bool) -> Result<Vec<Plan>, RepoError> {
        let mut plans: Vec<Plan> = self
            .plans
            .read()
            .await
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }
}

#[async_trait]
impl CredentialRepository for MemoryStore {
    async fn insert_credential(
        &self,
        plan_id: Uuid,
        credential: &NewCredential,
    ) -> Result<Credential, RepoError> {
        let pool = self.pool(plan_id).await;
        let mut pool = pool.lock().await;

        if pool
            .credentials
            .iter()
            .any(|c| c.username == credential.username)
        {
            return Err(RepoError::Duplicate(format!(
                "username {} already exists in plan {}",
                credential.username, plan_id
            )));
        }

        let created = Credential::new(plan_id, credential.username.clone(), credential.password.clone());
        pool.credentials.push(created.clone());
        self.credential_plans.write().await.insert(created.id, plan_id);
        Ok(created)
    }

    async fn claim_one(
        &self,
        plan_id: Uuid,
        order_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Credential>, RepoError> {
        let pool = self.pool(plan_id).await;
        let mut pool = pool.lock().await;

        let claimed = pool
            .credentials
            .iter_mut()
            .find(|c| !c.is_assigned)
            .map(|c| {
                c.assign(order_id, user_id);
                c.clone()
            });
        Ok(claimed)
    }

    async fn release(&self, credential_id: Uuid) -> Result<bool, RepoError> {
        let pool = self.pool_of_credential(credential_id).await?;
        let mut pool = pool.lock().await;

        let credential = pool
            .credentials
            .iter_mut()
            .find(|c| c.id == credential_id)
            .ok_or_else(|| RepoError::NotFound(format!("credential {}", credential_id)))?;
        Ok(credential.unassign())
    }

    async fn release_for_order(&self, credential_id: Uuid, order_id: Uuid) -> Result<bool, RepoError> {
        let pool = self.pool_of_credential(credential_id).await?;
        let mut pool = pool.lock().await;

        let credential = pool
            .credentials
            .iter_mut()
            .find(|c| c.id == credential_id)
            .ok_or_else(|| RepoError::NotFound(format!("credential {}", credential_id)))?;
        if !credential.is_assigned_to(order_id) {
            return Ok(false);
        }
        Ok(credential.unassign())
    }

    async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, RepoError> {
        let pool = match self.pool_of_credential(id).await {
            Ok(pool) => pool,
            Err(RepoError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let pool = pool.lock().await;
        Ok(pool.credentials.iter().find(|c| c.id == id).cloned())
    }

    async fn list_by_plan(&self, plan_id: Uuid) -> Result<Vec<Credential>, RepoError> {
        let pool = self.pool(plan_id).await;
        let pool = pool.lock().await;
        Ok(pool.credentials.clone())
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Credential>, RepoError> {
        let pools: Vec<Arc<Mutex<PlanPool>>> = self.pools.read().await.values().cloned().collect();

        let mut bound = Vec::new();
        for pool in pools {
            let pool = pool.lock().await;
            bound.extend(
                pool.credentials
                    .iter()
                    .filter(|c| c.is_assigned_to(order_id))
                    .cloned(),
            );
        }
        Ok(bound)
    }

    async fn stats(&self, plan_id: Uuid) -> Result<PoolStats, RepoError> {
        let pool = self.pool(plan_id).await;
        let pool = pool.lock().await;

        let total = pool.credentials.len() as i64;
        let assigned = pool.credentials.iter().filter(|c| c.is_assigned).count() as i64;
        Ok(PoolStats {
            plan_id,
            total,
            available: total - assigned,
            assigned,
        })
    }

    async fn delete_credential(&self, id: Uuid) -> Result<(), RepoError> {
        let pool = self.pool_of_credential(id).await?;
        let mut pool = pool.lock().await;

        let index = pool
            .credentials
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| RepoError::NotFound(format!("credential {}", id)))?;

        if pool.credentials[index].is_assigned {
            return Err(RepoError::InUse(format!("credential {} is assigned", id)));
        }

        pool.credentials.remove(index);
        self.credential_plans.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn create_coupon(&self, coupon: &Coupon) -> Result<(), RepoError> {
        let mut coupons = self.coupons.lock().await;
        if coupons.values().any(|c| c.code.eq_ignore_ascii_case(&coupon.code)) {
            return Err(RepoError::Duplicate(format!("coupon code {}", coupon.code)));
        }
        coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepoError> {
        let coupons = self.coupons.lock().await;
        Ok(coupons.values().find(|c| c.matches_code(code)).cloned())
    }

    async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>, RepoError> {
        Ok(self.coupons.lock().await.get(&id).cloned())
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>, RepoError> {
        let mut coupons: Vec<Coupon> = self.coupons.lock().await.values().cloned().collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), RepoError> {
        let mut coupons = self.coupons.lock().await;
        let coupon = coupons
            .get_mut(&id)
            .ok_or_else(|| RepoError::NotFound(format!("coupon {}", id)))?;
        coupon.is_active = active;
        coupon.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_usage_slot(&self, coupon_id: Uuid) -> Result<UsageSlot, RepoError> {
        let mut coupons = self.coupons.lock().await;
        take_usage_slot(&mut coupons, coupon_id)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create_order(&self, order: &Order) -> Result<(), RepoError> {
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.id) {
            return Err(RepoError::Duplicate(format!("order {}", order.id)));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        Ok(self.orders.lock().await.get(&id).cloned())
    }

    async fn list_orders(&self, user_id: &str) -> Result<Vec<Order>, RepoError> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_stale(
        &self,
        status: OrderStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepoError> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.status == status && o.created_at < created_before)
            .cloned()
            .collect())
    }

    async fn count_coupon_redemptions(
        &self,
        user_id: &str,
        coupon_id: Uuid,
        exclude_order: Option<Uuid>,
    ) -> Result<i64, RepoError> {
        let orders = self.orders.lock().await;
        Ok(redemptions(&orders, user_id, coupon_id, exclude_order) as i64)
    }

    async fn update_pricing(&self, order: &Order) -> Result<(), RepoError> {
        let mut orders = self.orders.lock().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order.id)))?;

        if stored.status != OrderStatus::Pending {
            return Err(RepoError::Stale(format!(
                "order {} is {}, pricing is frozen",
                stored.id, stored.status
            )));
        }

        stored.coupon_id = order.coupon_id;
        stored.loyalty_percent = order.loyalty_percent;
        stored.subtotal_usd = order.subtotal_usd;
        stored.discount_usd = order.discount_usd;
        stored.total_usd = order.total_usd;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_reference: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentConfirmation, RepoError> {
        let mut orders = self.orders.lock().await;
        let (user_id, coupon_id) = match orders.get(&order_id) {
            Some(order) if order.status == OrderStatus::Pending => (order.user_id.clone(), order.coupon_id),
            Some(order) => return Err(stale(order, OrderStatus::Pending, OrderStatus::Paid)),
            None => return Err(RepoError::NotFound(format!("order {}", order_id))),
        };

        let usage = match coupon_id {
            Some(coupon_id) => {
                let mut coupons = self.coupons.lock().await;
                let single_use = coupons
                    .get(&coupon_id)
                    .ok_or_else(|| RepoError::NotFound(format!("coupon {}", coupon_id)))?
                    .single_use_only;
                if single_use && redemptions(&orders, &user_id, coupon_id, Some(order_id)) > 0 {
                    Some(UsageSlot::AlreadyRedeemed)
                } else {
                    Some(take_usage_slot(&mut coupons, coupon_id)?)
                }
            }
            None => None,
        };

        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;
        order.status = OrderStatus::Paid;
        order.paid_at = Some(paid_at);
        order.payment_reference = Some(payment_reference.to_string());
        order.needs_reconciliation = usage.is_some_and(UsageSlot::needs_reconciliation);
        order.updated_at = Utc::now();

        Ok(PaymentConfirmation {
            order: order.clone(),
            usage,
        })
    }

    async fn record_fulfillment(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        allocations: &[Allocation],
    ) -> Result<Order, RepoError> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;

        if order.status != from || !from.can_transition_to(OrderStatus::Fulfilled) {
            return Err(stale(order, from, OrderStatus::Fulfilled));
        }

        order.allocations.extend(allocations.iter().cloned());
        order.status = OrderStatus::Fulfilled;
        order.failure_reason = None;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<&str>,
    ) -> Result<Order, RepoError> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;

        if order.status != from || !from.can_transition_to(to) {
            return Err(stale(order, from, to));
        }

        order.status = to;
        if let Some(reason) = reason {
            order.failure_reason = Some(reason.to_string());
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn release_allocations(
        &self,
        order_id: Uuid,
        credential_ids: &[Uuid],
        released_at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| RepoError::NotFound(format!("order {}", order_id)))?;

        for allocation in order.allocations.iter_mut() {
            if allocation.released_at.is_none() && credential_ids.contains(&allocation.credential_id) {
                allocation.released_at = Some(released_at);
            }
        }
        order.updated_at = Utc::now();
        Ok(())
    }
}
