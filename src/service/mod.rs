//! Subscription management and user resolution.

pub mod error;
pub mod subscription_registry;
pub mod user_resolver;
