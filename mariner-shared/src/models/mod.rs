pub mod coupon;
pub mod credential;
pub mod events;
pub mod order;
pub mod plan;

pub use coupon::{Coupon, CouponScope, DiscountType};
pub use credential::{Credential, NewCredential, PoolStats};
pub use order::{Allocation, Order, OrderItem, OrderStatus};
pub use plan::Plan;
