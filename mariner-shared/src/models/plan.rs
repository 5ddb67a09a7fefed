use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sellable data package. Credentials are pooled per plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub data_limit_gb: i32,
    pub price_usd: Decimal,
    pub validity_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(name: String, data_limit_gb: i32, price_usd: Decimal, validity_days: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            data_limit_gb,
            price_usd,
            validity_days,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
