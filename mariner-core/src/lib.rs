pub mod events;
pub mod repository;

pub use events::{EventPublisher, InMemoryPublisher, TracingPublisher};
pub use repository::{
    CouponRepository, CredentialRepository, OrderRepository, PaymentConfirmation, PlanRepository,
    RepoError, UsageSlot,
};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Event publish failed: {0}")]
    PublishError(String),
}
