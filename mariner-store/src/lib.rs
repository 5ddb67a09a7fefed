pub mod app_config;
pub mod coupon_repo;
pub mod credential_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod memory;
pub mod order_repo;
pub mod plan_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use coupon_repo::PgCouponRepository;
pub use credential_repo::PgCredentialRepository;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use memory::MemoryStore;
pub use order_repo::PgOrderRepository;
pub use plan_repo::PgPlanRepository;
pub use redis_repo::RedisClient;
