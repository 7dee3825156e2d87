//! Saga aggregate and its step entities.
//!
//! This module implements the saga state machine:
//! - Saga aggregate with status transitions and compensation bookkeeping
//! - SagaStep entity with its own status machine
//! - Pre-execution validation

mod aggregate;
mod state;
mod step;
mod validation;

pub use aggregate::{DEFAULT_SAGA_MAX_RETRIES, Saga};
pub use state::{SagaStatus, StepStatus};
pub use step::{DEFAULT_STEP_MAX_RETRIES, DEFAULT_STEP_TIMEOUT_SECS, SagaStep, StepType};
pub use validation::{ValidationResult, validate_execution};
