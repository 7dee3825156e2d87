//! Pre-execution checks.

use serde::{Deserialize, Serialize};

use super::Saga;

/// Outcome of a validation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ValidationResult::Invalid(reason.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(reason) => Some(reason),
        }
    }
}

/// Checks that a saga may be handed over for execution.
///
/// A saga is invalid when it is terminal, has no steps, or its sorted step
/// sequence numbers are not exactly `1..=N`.
pub fn validate_execution(saga: &Saga) -> ValidationResult {
    if saga.is_terminal() {
        return ValidationResult::invalid(format!(
            "Saga is in terminal state {}",
            saga.status()
        ));
    }

    if saga.steps().is_empty() {
        return ValidationResult::invalid("Saga has no steps");
    }

    let mut orders: Vec<u32> = saga.steps().iter().map(|s| s.sequence_order()).collect();
    orders.sort_unstable();
    if let Some((expected, actual)) = (1u32..)
        .zip(orders.iter().copied())
        .find(|(expected, actual)| expected != actual)
    {
        return ValidationResult::invalid(format!(
            "Step sequence must be contiguous from 1: expected {expected}, found {actual}"
        ));
    }

    if let Some(step) = saga.steps().iter().find(|step| {
        step.service_name().trim().is_empty() || step.action_name().trim().is_empty()
    }) {
        return ValidationResult::invalid(format!(
            "Step '{}' must name a service and an action",
            step.name()
        ));
    }

    ValidationResult::Valid
}
