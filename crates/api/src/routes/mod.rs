//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod sagas;
pub mod steps;
