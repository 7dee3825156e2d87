//! Workflow definitions: which steps a saga of a given type runs.

use std::collections::BTreeMap;

use domain::{SagaStep, StepType};

use crate::clients::{ACCOUNT_SERVICE, TRANSACTION_SERVICE};
use crate::error::{Result, SagaError};

pub const TRANSFER: &str = "TRANSFER";
pub const PAYMENT: &str = "PAYMENT";
pub const ACCOUNT_CREATION: &str = "ACCOUNT_CREATION";

pub const NOTIFICATION_SERVICE: &str = "notification-service";

/// Blueprint for one step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTemplate {
    name: String,
    step_type: StepType,
    service_name: String,
    action_name: String,
    compensation_action: Option<String>,
}

impl StepTemplate {
    pub fn new(
        name: impl Into<String>,
        step_type: StepType,
        service_name: impl Into<String>,
        action_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            step_type,
            service_name: service_name.into(),
            action_name: action_name.into(),
            compensation_action: None,
        }
    }

    pub fn with_compensation(mut self, action: impl Into<String>) -> Self {
        self.compensation_action = Some(action.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, sequence_order: u32) -> SagaStep {
        let step = SagaStep::new(
            self.name.clone(),
            self.step_type,
            sequence_order,
            self.service_name.clone(),
            self.action_name.clone(),
        );
        match &self.compensation_action {
            Some(action) => step.with_compensation(action.clone()),
            None => step,
        }
    }
}

/// Ordered step templates for one saga type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaDefinition {
    saga_type: String,
    steps: Vec<StepTemplate>,
}

impl SagaDefinition {
    pub fn new(saga_type: impl Into<String>, steps: Vec<StepTemplate>) -> Self {
        Self {
            saga_type: saga_type.into().to_ascii_uppercase(),
            steps,
        }
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn steps(&self) -> &[StepTemplate] {
        &self.steps
    }

    /// Fresh steps numbered 1..=N in template order.
    pub fn build_steps(&self) -> Vec<SagaStep> {
        (1u32..)
            .zip(&self.steps)
            .map(|(order, template)| template.instantiate(order))
            .collect()
    }

    pub fn transfer() -> Self {
        Self::new(
            TRANSFER,
            vec![
                StepTemplate::new(
                    "create_transaction",
                    StepType::CreateTransaction,
                    TRANSACTION_SERVICE,
                    "create_transaction",
                )
                .with_compensation("cancel_transaction"),
                StepTemplate::new(
                    "debit_source",
                    StepType::DebitAccount,
                    ACCOUNT_SERVICE,
                    "withdraw",
                )
                .with_compensation("credit_source"),
                StepTemplate::new(
                    "credit_destination",
                    StepType::CreditAccount,
                    ACCOUNT_SERVICE,
                    "deposit",
                ),
            ],
        )
    }

    pub fn payment() -> Self {
        Self::new(
            PAYMENT,
            vec![
                StepTemplate::new(
                    "create_transaction",
                    StepType::CreateTransaction,
                    TRANSACTION_SERVICE,
                    "create_transaction",
                ),
                StepTemplate::new(
                    "process_transaction",
                    StepType::ProcessTransaction,
                    TRANSACTION_SERVICE,
                    "process_transaction",
                ),
            ],
        )
    }

    pub fn account_creation() -> Self {
        Self::new(
            ACCOUNT_CREATION,
            vec![StepTemplate::new(
                "notify_owner",
                StepType::Notify,
                NOTIFICATION_SERVICE,
                "notify",
            )],
        )
    }
}

/// Registry of saga definitions keyed by upper-cased saga type.
#[derive(Debug, Clone, Default)]
pub struct SagaDefinitions {
    definitions: BTreeMap<String, SagaDefinition>,
}

impl SagaDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in TRANSFER, PAYMENT and ACCOUNT_CREATION workflows.
    pub fn standard() -> Self {
        let mut definitions = Self::new();
        definitions.register(SagaDefinition::transfer());
        definitions.register(SagaDefinition::payment());
        definitions.register(SagaDefinition::account_creation());
        definitions
    }

    /// Adds or replaces a definition.
    pub fn register(&mut self, definition: SagaDefinition) {
        self.definitions
            .insert(definition.saga_type().to_string(), definition);
    }

    /// Looks up a definition, ignoring case.
    pub fn get(&self, saga_type: &str) -> Result<&SagaDefinition> {
        self.definitions
            .get(&saga_type.trim().to_ascii_uppercase())
            .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))
    }

    pub fn saga_types(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let definitions = SagaDefinitions::standard();
        assert_eq!(definitions.get("transfer").unwrap().saga_type(), TRANSFER);
        assert_eq!(definitions.get(" Payment ").unwrap().saga_type(), PAYMENT);
        assert!(matches!(
            definitions.get("REFUND"),
            Err(SagaError::UnknownSagaType(t)) if t == "REFUND"
        ));
        assert_eq!(
            definitions.saga_types().collect::<Vec<_>>(),
            [ACCOUNT_CREATION, PAYMENT, TRANSFER]
        );
    }

    #[test]
    fn test_transfer_steps() {
        let steps = SagaDefinition::transfer().build_steps();

        let summary: Vec<(u32, &str, Option<&str>)> = steps
            .iter()
            .map(|s| (s.sequence_order(), s.name(), s.compensation_action()))
            .collect();
        assert_eq!(
            summary,
            [
                (1, "create_transaction", Some("cancel_transaction")),
                (2, "debit_source", Some("credit_source")),
                (3, "credit_destination", None),
            ]
        );
        assert_eq!(steps[1].service_name(), ACCOUNT_SERVICE);
    }

    #[test]
    fn test_built_steps_are_fresh() {
        let definition = SagaDefinition::payment();
        let first = definition.build_steps();
        let second = definition.build_steps();
        assert_ne!(first[0].id(), second[0].id());
        assert!(first.iter().all(|s| !s.has_compensation_action()));
    }
}
