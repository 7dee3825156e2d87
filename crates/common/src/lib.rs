//! Shared types used across the saga orchestrator crates.

pub mod types;

pub use types::{IdParseError, SagaId, StepId, Version};
