use mariner_catalog::{ClaimOutcome, CredentialPool, PoolError};
use mariner_shared::{Allocation, Order};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::manager::OrderError;

/// Result of trying to cover every unit of an order from the pools.
#[derive(Debug)]
pub enum AllocationOutcome {
    /// One allocation per purchased unit. The credentials are already assigned.
    Allocated(Vec<Allocation>),
    /// A plan ran dry. Everything claimed for the order has been released.
    Shortfall { plan_id: Uuid, released: usize },
}

/// Credentials handed back by one release pass.
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// No longer bound to the order, whether this pass freed them or not.
    pub settled: Vec<Uuid>,
    /// Freed by this pass.
    pub released: usize,
    /// First failure. Credentials that failed stay bound and are not in `settled`.
    pub error: Option<PoolError>,
}

/// Claims credentials for paid orders and returns them on rollback or refund.
pub struct AllocationCoordinator {
    pool: Arc<CredentialPool>,
}

impl AllocationCoordinator {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self { pool }
    }

    /// Claim exactly `quantity` credentials per item. Partial fulfillment is
    /// never left behind: any shortfall or error releases what was claimed.
    pub async fn allocate(&self, order: &Order) -> Result<AllocationOutcome, OrderError> {
        let mut allocations: Vec<Allocation> = Vec::new();

        for item in &order.items {
            for _ in 0..item.quantity {
                let outcome = match self.pool.claim_one(item.plan_id, order.id, &order.user_id).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.rollback(order.id, &allocations).await?;
                        return Err(e.into());
                    }
                };

                match outcome {
                    ClaimOutcome::Claimed(credential) if credential.is_assigned_to(order.id) => {
                        debug!(order_id = %order.id, credential_id = %credential.id, "Credential claimed");
                        allocations.push(Allocation::new(order.id, item.id, item.plan_id, credential.id));
                    }
                    ClaimOutcome::Claimed(credential) => {
                        error!(
                            order_id = %order.id,
                            credential_id = %credential.id,
                            assigned_to = ?credential.assigned_to_order_id,
                            "Claim returned a credential bound to another order"
                        );
                        self.rollback(order.id, &allocations).await?;
                        return Err(OrderError::Consistency {
                            order_id: order.id,
                            detail: format!("claimed credential {} is not bound to the order", credential.id),
                        });
                    }
                    ClaimOutcome::NotAvailable => {
                        let released = self.rollback(order.id, &allocations).await?;
                        info!(
                            order_id = %order.id,
                            plan_id = %item.plan_id,
                            released,
                            "Plan out of stock, fulfillment rolled back"
                        );
                        return Ok(AllocationOutcome::Shortfall {
                            plan_id: item.plan_id,
                            released,
                        });
                    }
                }
            }
        }

        Ok(AllocationOutcome::Allocated(allocations))
    }

    /// Release the given allocations' credentials. Every release is attempted
    /// even if one fails; the first failure is returned.
    pub async fn rollback(&self, order_id: Uuid, allocations: &[Allocation]) -> Result<usize, OrderError> {
        let ids: Vec<Uuid> = allocations.iter().map(|a| a.credential_id).collect();
        let report = self.release_credentials(order_id, &ids).await;
        match report.error {
            Some(e) => Err(e.into()),
            None => Ok(report.released),
        }
    }

    /// Unbind the credentials from the order. A credential that has since been
    /// handed to another order is left with it.
    pub async fn release_credentials(&self, order_id: Uuid, credential_ids: &[Uuid]) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        for id in credential_ids {
            match self.pool.release_for_order(*id, order_id).await {
                Ok(true) => {
                    report.released += 1;
                    report.settled.push(*id);
                }
                Ok(false) => {
                    debug!(order_id = %order_id, credential_id = %id, "Credential no longer bound to the order");
                    report.settled.push(*id);
                }
                Err(e) => {
                    error!(order_id = %order_id, credential_id = %id, "Failed to release credential: {}", e);
                    report.error.get_or_insert(e);
                }
            }
        }

        report
    }

    /// The order's live allocations must be exactly the credentials the pool
    /// has assigned to it.
    pub async fn verify_consistency(&self, order: &Order) -> Result<(), OrderError> {
        let expected: BTreeSet<Uuid> = order.active_allocations().map(|a| a.credential_id).collect();
        let actual: BTreeSet<Uuid> = self
            .pool
            .list_by_order(order.id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        if expected == actual {
            return Ok(());
        }

        let missing: Vec<&Uuid> = expected.difference(&actual).collect();
        let unexpected: Vec<&Uuid> = actual.difference(&expected).collect();
        error!(
            order_id = %order.id,
            status = %order.status,
            ?missing,
            ?unexpected,
            "Allocation records and credential pool disagree"
        );
        Err(OrderError::Consistency {
            order_id: order.id,
            detail: format!(
                "{} allocation(s) without a bound credential, {} bound credential(s) without an allocation",
                missing.len(),
                unexpected.len()
            ),
        })
    }
}
