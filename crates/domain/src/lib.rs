//! Domain layer for the saga orchestrator.
//!
//! This crate provides the pure saga model:
//! - Saga aggregate with its lifecycle state machine
//! - SagaStep entity and step state machine
//! - Validation of sagas before execution
//!
//! Nothing here performs I/O; persistence and remote calls live in other crates.

pub mod error;
pub mod saga;

pub use error::DomainError;
pub use saga::{
    DEFAULT_SAGA_MAX_RETRIES, DEFAULT_STEP_MAX_RETRIES, DEFAULT_STEP_TIMEOUT_SECS, Saga,
    SagaStatus, SagaStep, StepStatus, StepType, ValidationResult, validate_execution,
};
