pub mod code;
pub mod models;
pub mod policy;
pub mod rules;

use mariner_core::RepoError;
use uuid::Uuid;

pub use code::CouponCode;
pub use models::{CouponValidation, NewCoupon};
pub use policy::CouponPolicy;
pub use rules::{RejectionReason, ValidationContext};

#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    #[error("Invalid coupon code: {0}")]
    InvalidCode(String),

    #[error("Invalid coupon: {0}")]
    Invalid(String),

    #[error("Coupon code already exists: {0}")]
    DuplicateCode(String),

    #[error("Coupon not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepoError),
}
