//! Request-level operations over the directories, returning [`ServiceError`] outcomes.
//!
//! [`ServiceError`]: crate::error::ServiceError

pub mod events;
pub mod subscriptions;

pub use events::{CatalogReport, EventService};
pub use subscriptions::{canonical_phone, LinkOutcome, SubscriptionReceipt, SubscriptionService};
