//! Saga step entity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::StepId;
use serde::{Deserialize, Serialize};

use crate::DomainError;

use super::StepStatus;

/// Default retry budget for a single step.
pub const DEFAULT_STEP_MAX_RETRIES: u32 = 3;

/// Default timeout for a single step, in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// The kind of remote action a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    CreateTransaction,
    ProcessTransaction,
    DebitAccount,
    CreditAccount,
    Notify,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::CreateTransaction => "CREATE_TRANSACTION",
            StepType::ProcessTransaction => "PROCESS_TRANSACTION",
            StepType::DebitAccount => "DEBIT_ACCOUNT",
            StepType::CreditAccount => "CREDIT_ACCOUNT",
            StepType::Notify => "NOTIFY",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work inside a saga.
///
/// A step targets a single remote service action. If it declares a
/// compensation action, that action undoes the step's effect when the saga
/// is rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    id: StepId,
    name: String,
    step_type: StepType,
    sequence_order: u32,
    status: StepStatus,
    service_name: String,
    action_name: String,
    compensation_action: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    compensation_started_at: Option<DateTime<Utc>>,
    compensation_completed_at: Option<DateTime<Utc>>,
    output: Option<String>,
    compensation_data: Option<String>,
    error_message: Option<String>,
    retry_count: u32,
    max_retry_attempts: u32,
    timeout_seconds: u64,
}

impl SagaStep {
    /// Creates a pending step.
    pub fn new(
        name: impl Into<String>,
        step_type: StepType,
        sequence_order: u32,
        service_name: impl Into<String>,
        action_name: impl Into<String>,
    ) -> Self {
        Self {
            id: StepId::new(),
            name: name.into(),
            step_type,
            sequence_order,
            status: StepStatus::Pending,
            service_name: service_name.into(),
            action_name: action_name.into(),
            compensation_action: None,
            parameters: HashMap::new(),
            started_at: None,
            completed_at: None,
            compensation_started_at: None,
            compensation_completed_at: None,
            output: None,
            compensation_data: None,
            error_message: None,
            retry_count: 0,
            max_retry_attempts: DEFAULT_STEP_MAX_RETRIES,
            timeout_seconds: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }

    /// Sets the action that undoes this step. Blank names are ignored.
    pub fn with_compensation(mut self, action: impl Into<String>) -> Self {
        let action = action.into();
        self.compensation_action = (!action.trim().is_empty()).then_some(action);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retry_attempts(mut self, max: u32) -> Self {
        self.max_retry_attempts = max;
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }
}

// Query methods
impl SagaStep {
    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    pub fn sequence_order(&self) -> u32 {
        self.sequence_order
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn compensation_action(&self) -> Option<&str> {
        self.compensation_action.as_deref()
    }

    /// Returns true if the step declares a non-blank compensation action.
    pub fn has_compensation_action(&self) -> bool {
        self.compensation_action
            .as_deref()
            .is_some_and(|action| !action.trim().is_empty())
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn compensation_started_at(&self) -> Option<DateTime<Utc>> {
        self.compensation_started_at
    }

    pub fn compensation_completed_at(&self) -> Option<DateTime<Utc>> {
        self.compensation_completed_at
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn compensation_data(&self) -> Option<&str> {
        self.compensation_data.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Returns true if the step failed and still has retry budget.
    pub fn can_retry(&self) -> bool {
        self.status == StepStatus::Failed && self.retry_count < self.max_retry_attempts
    }

    /// Returns true if the step's effect may need to be undone on rollback.
    ///
    /// Covers steps that completed, whose compensation is in flight, or that
    /// were already compensated.
    pub fn is_compensation_candidate(&self) -> bool {
        self.has_compensation_action()
            && matches!(
                self.status,
                StepStatus::Completed | StepStatus::Compensating | StepStatus::Compensated
            )
    }
}

// Transition methods
impl SagaStep {
    fn transition(&mut self, to: StepStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub(crate) fn start(&mut self) -> Result<(), DomainError> {
        self.transition(StepStatus::Executing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn complete(
        &mut self,
        output: Option<String>,
        compensation_data: Option<String>,
    ) -> Result<(), DomainError> {
        self.transition(StepStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.output = output;
        self.compensation_data = compensation_data;
        self.error_message = None;
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) -> Result<(), DomainError> {
        self.transition(StepStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        Ok(())
    }

    pub(crate) fn skip(&mut self) -> Result<(), DomainError> {
        self.transition(StepStatus::Skipped)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn begin_compensation(&mut self) -> Result<(), DomainError> {
        if !self.has_compensation_action() {
            return Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from: self.status,
                to: StepStatus::Compensating,
            });
        }
        self.transition(StepStatus::Compensating)?;
        self.compensation_started_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn finish_compensation(&mut self) -> Result<(), DomainError> {
        self.transition(StepStatus::Compensated)?;
        self.compensation_completed_at = Some(Utc::now());
        Ok(())
    }

    /// Restamps the claim on a step that is still `Compensating`.
    pub(crate) fn renew_compensation(&mut self) -> Result<(), DomainError> {
        if self.status != StepStatus::Compensating {
            return Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from: self.status,
                to: StepStatus::Compensating,
            });
        }
        self.compensation_started_at = Some(Utc::now());
        Ok(())
    }

    /// Returns a step whose compensation attempt failed to `Completed`, so a
    /// later compensation pass picks it up again.
    pub(crate) fn abandon_compensation(
        &mut self,
        error: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.transition(StepStatus::Completed)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    pub(crate) fn reset_for_retry(&mut self) -> Result<(), DomainError> {
        if self.status == StepStatus::Failed && self.retry_count >= self.max_retry_attempts {
            return Err(DomainError::RetryExhausted {
                target: format!("step '{}'", self.name),
                retry_count: self.retry_count,
                max_retry_attempts: self.max_retry_attempts,
            });
        }
        self.transition(StepStatus::Pending)?;
        self.retry_count += 1;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        Ok(())
    }
}
