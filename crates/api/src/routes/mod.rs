//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod relay;
pub mod sagas;
pub mod sessions;
