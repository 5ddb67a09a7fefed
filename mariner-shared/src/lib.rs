pub mod models;
pub mod pii;

pub use models::{
    Allocation, Coupon, CouponScope, Credential, DiscountType, NewCredential, Order, OrderItem,
    OrderStatus, Plan, PoolStats,
};
