pub mod inventory;
pub mod plan;
pub mod pricing;

pub use inventory::{ClaimOutcome, CredentialPool, ImportReport, PlanAvailability, PoolError};
pub use plan::{NewPlan, PlanCatalog, PlanError};
pub use pricing::{ComposedTotal, DiscountComposer, LoyaltyProgram, LoyaltyStatus, LoyaltyTier};
