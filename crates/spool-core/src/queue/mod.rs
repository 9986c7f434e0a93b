//! Queue module: task registry, distribution channel and retry policy.

mod channel;
mod retry;
mod store;

pub use channel::{DeliveryChannel, Slot};
pub use retry::RetryPolicy;
pub use store::{Claim, TaskStore};
