pub mod fulfillment;
pub mod manager;
pub mod models;

pub use fulfillment::{AllocationCoordinator, AllocationOutcome, ReleaseReport};
pub use manager::{OrderError, OrderManager, OrderSettings};
pub use models::{CartLine, CartRequest, ExpirySummary, OrderView, Quote, QuoteLine};
