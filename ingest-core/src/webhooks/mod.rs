//! Webhook Dispatcher (spec §4.5, C5): signed, retried fan-out of domain
//! events to subscriber endpoints, plus the Subscription CRUD surface
//! (spec §6) it delivers against.

pub mod dispatcher;
pub mod signing;
pub mod subscription;

pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use subscription::{
    CreateSubscription, InMemorySubscriptionStore, Subscription, SubscriptionStore,
};
