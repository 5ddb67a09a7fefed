use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pii::Masked;

/// One captive-portal login drawn from a plan's finite pool.
///
/// `is_assigned == false` implies every `assigned_*` field is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub username: String,
    pub password: Masked<String>,
    pub is_assigned: bool,
    pub assigned_to_order_id: Option<Uuid>,
    pub assigned_to_user_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(plan_id: Uuid, username: String, password: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            username,
            password: Masked(password),
            is_assigned: false,
            assigned_to_order_id: None,
            assigned_to_user_id: None,
            assigned_at: None,
            created_at: Utc::now(),
        }
    }

    /// Bind this credential to an order. Callers must hold the plan's claim lock.
    pub fn assign(&mut self, order_id: Uuid, user_id: &str) {
        self.is_assigned = true;
        self.assigned_to_order_id = Some(order_id);
        self.assigned_to_user_id = Some(user_id.to_string());
        self.assigned_at = Some(Utc::now());
    }

    /// Return the credential to the pool. Returns false if it was already available.
    pub fn unassign(&mut self) -> bool {
        let was_assigned = self.is_assigned;
        self.is_assigned = false;
        self.assigned_to_order_id = None;
        self.assigned_to_user_id = None;
        self.assigned_at = None;
        was_assigned
    }

    pub fn is_assigned_to(&self, order_id: Uuid) -> bool {
        self.is_assigned && self.assigned_to_order_id == Some(order_id)
    }
}

/// A parsed `username,password` pair awaiting insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub username: String,
    pub password: String,
}

/// Committed pool counts for one plan. `available + assigned == total` always.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub plan_id: Uuid,
    pub total: i64,
    pub available: i64,
    pub assigned: i64,
}

impl PoolStats {
    pub fn empty(plan_id: Uuid) -> Self {
        Self {
            plan_id,
            total: 0,
            available: 0,
            assigned: 0,
        }
    }

    pub fn in_stock(&self) -> bool {
        self.available > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_unassign() {
        let mut credential = Credential::new(Uuid::new_v4(), "sea-001".into(), "pw".into());
        let order_id = Uuid::new_v4();

        credential.assign(order_id, "user-1");
        assert!(credential.is_assigned_to(order_id));
        assert_eq!(credential.assigned_to_user_id.as_deref(), Some("user-1"));

        assert!(credential.unassign());
        assert!(!credential.is_assigned);
        assert!(credential.assigned_to_order_id.is_none());
        assert!(credential.assigned_at.is_none());

        // Second release is a no-op
        assert!(!credential.unassign());
    }

    #[test]
    fn test_password_not_in_debug() {
        let credential = Credential::new(Uuid::new_v4(), "sea-001".into(), "s3cret".into());
        assert!(!format!("{:?}", credential).contains("s3cret"));
    }
}
