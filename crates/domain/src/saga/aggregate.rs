//! Saga aggregate implementation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{SagaId, StepId, Version};
use serde::{Deserialize, Serialize};

use crate::DomainError;

use super::{SagaStatus, SagaStep, StepStatus};

/// Default retry budget for a saga.
pub const DEFAULT_SAGA_MAX_RETRIES: u32 = 3;

/// Saga aggregate root.
///
/// A saga coordinates an ordered list of steps across remote services. The
/// status only moves along the transitions allowed by [`SagaStatus`], and a
/// terminal saga can no longer be modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    id: SagaId,

    /// Persisted version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    /// Caller-supplied idempotency key, unique across all sagas.
    business_key: String,

    /// Workflow definition this saga was built from.
    saga_type: String,

    status: SagaStatus,
    correlation_id: Option<String>,

    #[serde(default)]
    context: HashMap<String, String>,

    /// Steps, kept sorted by sequence order.
    #[serde(default)]
    steps: Vec<SagaStep>,

    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    compensation_started_at: Option<DateTime<Utc>>,
    compensation_completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    retry_count: u32,
    max_retry_attempts: u32,
}

impl Saga {
    /// Creates a saga in `Started` status with no steps.
    pub fn new(
        business_key: impl Into<String>,
        saga_type: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: SagaId::new(),
            version: Version::initial(),
            business_key: business_key.into(),
            saga_type: saga_type.into(),
            status: SagaStatus::Started,
            correlation_id,
            context: HashMap::new(),
            steps: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            compensation_started_at: None,
            compensation_completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retry_attempts: DEFAULT_SAGA_MAX_RETRIES,
        }
    }

    pub fn with_max_retry_attempts(mut self, max: u32) -> Self {
        self.max_retry_attempts = max;
        self
    }
}

// Query methods
impl Saga {
    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the persisted version. Only repositories should call this.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn business_key(&self) -> &str {
        &self.business_key
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Returns the steps ordered by sequence.
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn step(&self, step_id: StepId) -> Option<&SagaStep> {
        self.steps.iter().find(|step| step.id() == step_id)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|step| step.name() == name)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
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

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the saga failed and still has retry budget.
    pub fn can_retry(&self) -> bool {
        self.status == SagaStatus::Failed && self.retry_count < self.max_retry_attempts
    }

    /// Returns true if the saga failed and compensation may still be attempted.
    pub fn needs_compensation(&self) -> bool {
        self.can_retry()
    }

    /// Returns true if the saga started before `before` and is still running.
    pub fn is_stuck(&self, before: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.started_at < before
    }

    pub fn has_completed_steps(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status() == StepStatus::Completed)
    }

    /// Names of steps that are neither completed nor skipped.
    pub fn incomplete_steps(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|step| !step.status().is_forward_success())
            .map(|step| step.name().to_string())
            .collect()
    }

    /// Steps whose effect must be undone on rollback, highest sequence first.
    pub fn compensation_candidates(&self) -> Vec<&SagaStep> {
        let mut candidates: Vec<&SagaStep> = self
            .steps
            .iter()
            .filter(|step| step.is_compensation_candidate())
            .collect();
        candidates.sort_by(|a, b| b.sequence_order().cmp(&a.sequence_order()));
        candidates
    }

    /// Candidates that have not been compensated yet, highest sequence first.
    pub fn pending_compensations(&self) -> Vec<StepId> {
        self.compensation_candidates()
            .into_iter()
            .filter(|step| step.status() != StepStatus::Compensated)
            .map(|step| step.id())
            .collect()
    }

    /// Returns true once every compensation candidate is compensated.
    pub fn is_fully_compensated(&self) -> bool {
        self.pending_compensations().is_empty()
    }

    /// Returns the lowest-sequence step still waiting to run.
    pub fn next_pending_step(&self) -> Option<&SagaStep> {
        self.steps
            .iter()
            .find(|step| step.status() == StepStatus::Pending)
    }

    /// Elapsed time from start to completion, if the saga has finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

// Transition methods
impl Saga {
    fn ensure_mutable(&self) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::SagaTerminal {
                status: self.status,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: SagaStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn step_mut(&mut self, step_id: StepId) -> Result<&mut SagaStep, DomainError> {
        self.steps
            .iter_mut()
            .find(|step| step.id() == step_id)
            .ok_or(DomainError::StepNotFound(step_id))
    }

    fn require_status(&self, expected: SagaStatus, to: SagaStatus) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Adds a step, keeping steps ordered by sequence.
    ///
    /// Sequence numbers are not checked here; [`validate_execution`] rejects
    /// gaps and duplicates before the saga runs.
    ///
    /// [`validate_execution`]: super::validate_execution
    pub fn add_step(&mut self, step: SagaStep) -> Result<(), DomainError> {
        self.ensure_mutable()?;

        if self.steps.iter().any(|s| s.id() == step.id()) {
            return Err(DomainError::DuplicateStep(step.name().to_string()));
        }

        let position = self
            .steps
            .partition_point(|s| s.sequence_order() <= step.sequence_order());
        self.steps.insert(position, step);
        Ok(())
    }

    pub fn update_context(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.context.insert(key.into(), value.into());
        Ok(())
    }

    /// `Started` → `InProgress`.
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Started, SagaStatus::InProgress)?;
        self.transition(SagaStatus::InProgress)?;
        self.started_at = Utc::now();
        Ok(())
    }

    /// `InProgress` → `Completed`, only when every step completed or was skipped.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.require_status(SagaStatus::InProgress, SagaStatus::Completed)?;

        let incomplete = self.incomplete_steps();
        if !incomplete.is_empty() {
            return Err(DomainError::StepsIncomplete { steps: incomplete });
        }

        self.transition(SagaStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the saga as failed with `reason`.
    ///
    /// From `Started` or `InProgress` the saga moves to `Failed`. Whenever the
    /// saga ends up `Failed` with at least one completed step, compensation
    /// starts in the same call. A compensating saga only records the reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        let reason = reason.into();

        match self.status {
            SagaStatus::Compensating => {
                self.error_message = Some(reason);
                return Ok(());
            }
            SagaStatus::Failed => {}
            _ => self.transition(SagaStatus::Failed)?,
        }

        self.error_message = Some(reason);
        if self.has_completed_steps() {
            self.start_compensation()?;
        }
        Ok(())
    }

    /// `Failed` → `Compensating`.
    pub fn start_compensation(&mut self) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Failed, SagaStatus::Compensating)?;
        self.transition(SagaStatus::Compensating)?;
        self.compensation_started_at = Some(Utc::now());
        Ok(())
    }

    /// `Compensating` → `Compensated`, only when every candidate step is compensated.
    pub fn mark_compensated(&mut self) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Compensating, SagaStatus::Compensated)?;

        let pending: Vec<String> = self
            .compensation_candidates()
            .into_iter()
            .filter(|step| step.status() != StepStatus::Compensated)
            .map(|step| step.name().to_string())
            .collect();
        if !pending.is_empty() {
            return Err(DomainError::CompensationIncomplete { steps: pending });
        }

        self.transition(SagaStatus::Compensated)?;
        let now = Utc::now();
        self.compensation_completed_at = Some(now);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Any non-terminal status → `Aborted`. Never triggers compensation.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.transition(SagaStatus::Aborted)?;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `Failed` → `InProgress`, consuming one unit of retry budget.
    pub fn retry(&mut self) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Failed, SagaStatus::InProgress)?;
        if !self.can_retry() {
            return Err(DomainError::RetryExhausted {
                target: format!("saga {}", self.id),
                retry_count: self.retry_count,
                max_retry_attempts: self.max_retry_attempts,
            });
        }
        self.transition(SagaStatus::InProgress)?;
        self.retry_count += 1;
        self.error_message = None;
        Ok(())
    }
}

// Step transitions
impl Saga {
    pub fn start_step(&mut self, step_id: StepId) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.require_status(SagaStatus::InProgress, SagaStatus::InProgress)?;
        self.step_mut(step_id)?.start()
    }

    pub fn complete_step(
        &mut self,
        step_id: StepId,
        output: Option<String>,
        compensation_data: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.step_mut(step_id)?.complete(output, compensation_data)
    }

    pub fn fail_step(
        &mut self,
        step_id: StepId,
        error: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.step_mut(step_id)?.fail(error)
    }

    pub fn skip_step(&mut self, step_id: StepId) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.step_mut(step_id)?.skip()
    }

    /// Resets a failed step to `Pending` so it runs again.
    pub fn reset_step_for_retry(&mut self, step_id: StepId) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.step_mut(step_id)?.reset_for_retry()
    }

    pub fn begin_step_compensation(&mut self, step_id: StepId) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Compensating, SagaStatus::Compensating)?;
        self.step_mut(step_id)?.begin_compensation()
    }

    /// Takes over a compensation claim whose holder went quiet.
    pub fn renew_step_compensation(&mut self, step_id: StepId) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Compensating, SagaStatus::Compensating)?;
        self.step_mut(step_id)?.renew_compensation()
    }

    pub fn finish_step_compensation(&mut self, step_id: StepId) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Compensating, SagaStatus::Compensating)?;
        self.step_mut(step_id)?.finish_compensation()
    }

    /// Records a failed compensation attempt; the step returns to `Completed`.
    pub fn abandon_step_compensation(
        &mut self,
        step_id: StepId,
        error: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.require_status(SagaStatus::Compensating, SagaStatus::Compensating)?;
        self.step_mut(step_id)?.abandon_compensation(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::StepType;

    fn transfer_saga() -> Saga {
        let mut saga = Saga::new("BK-1", "TRANSFER", Some("corr-1".into()));
        saga.add_step(
            SagaStep::new(
                "create_transaction",
                StepType::CreateTransaction,
                1,
                "transaction-service",
                "create_transaction",
            )
            .with_compensation("cancel_transaction"),
        )
        .unwrap();
        saga.add_step(
            SagaStep::new(
                "debit_source",
                StepType::DebitAccount,
                2,
                "account-service",
                "withdraw",
            )
            .with_compensation("credit_source"),
        )
        .unwrap();
        saga.add_step(SagaStep::new(
            "credit_destination",
            StepType::CreditAccount,
            3,
            "account-service",
            "deposit",
        ))
        .unwrap();
        saga
    }

    fn step_id(saga: &Saga, name: &str) -> StepId {
        saga.step_by_name(name).unwrap().id()
    }

    fn run_step(saga: &mut Saga, name: &str) {
        let id = step_id(saga, name);
        saga.start_step(id).unwrap();
        saga.complete_step(id, None, None).unwrap();
    }

    #[test]
    fn test_new_saga() {
        let saga = transfer_saga();
        assert_eq!(saga.status(), SagaStatus::Started);
        assert_eq!(saga.version(), Version::initial());
        assert_eq!(saga.business_key(), "BK-1");
        assert_eq!(saga.correlation_id(), Some("corr-1"));
        assert_eq!(saga.steps().len(), 3);
        assert_eq!(saga.max_retry_attempts(), DEFAULT_SAGA_MAX_RETRIES);
        assert!(saga.completed_at().is_none());
    }

    #[test]
    fn test_steps_are_ordered_by_sequence() {
        let mut saga = Saga::new("BK", "T", None);
        saga.add_step(SagaStep::new("b", StepType::Notify, 2, "s", "a"))
            .unwrap();
        saga.add_step(SagaStep::new("a", StepType::Notify, 1, "s", "a"))
            .unwrap();
        saga.add_step(SagaStep::new("c", StepType::Notify, 1, "s", "a"))
            .unwrap();
        let names: Vec<&str> = saga.steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_same_step_cannot_be_added_twice() {
        let mut saga = Saga::new("BK", "T", None);
        let step = SagaStep::new("a", StepType::Notify, 1, "s", "a");
        saga.add_step(step.clone()).unwrap();
        assert_eq!(
            saga.add_step(step).unwrap_err(),
            DomainError::DuplicateStep("a".into())
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        let err = saga.start().unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: SagaStatus::InProgress,
                to: SagaStatus::InProgress,
            }
        );
    }

    #[test]
    fn test_complete_requires_all_steps_done() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "create_transaction");

        let err = saga.complete().unwrap_err();
        assert_eq!(
            err,
            DomainError::StepsIncomplete {
                steps: vec!["debit_source".into(), "credit_destination".into()],
            }
        );
        assert_eq!(saga.status(), SagaStatus::InProgress);

        run_step(&mut saga, "debit_source");
        saga.skip_step(step_id(&saga, "credit_destination")).unwrap();
        saga.complete().unwrap();
        assert_eq!(saga.status(), SagaStatus::Completed);
        assert!(saga.completed_at().is_some());
        assert!(saga.duration().is_some());
    }

    #[test]
    fn test_complete_from_started_is_rejected() {
        let mut saga = Saga::new("BK", "T", None);
        assert!(matches!(
            saga.complete(),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_fail_without_completed_steps_stays_failed() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        saga.fail("boom").unwrap();
        assert_eq!(saga.status(), SagaStatus::Failed);
        assert_eq!(saga.error_message(), Some("boom"));
        assert!(saga.compensation_started_at().is_none());
    }

    #[test]
    fn test_fail_with_completed_steps_starts_compensation() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "create_transaction");
        run_step(&mut saga, "debit_source");

        saga.fail("credit rejected").unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensating);
        assert!(saga.compensation_started_at().is_some());

        let order: Vec<&str> = saga
            .compensation_candidates()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(order, vec!["debit_source", "create_transaction"]);
    }

    #[test]
    fn test_fail_while_compensating_only_records_reason() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "create_transaction");
        saga.fail("first").unwrap();
        saga.fail("second").unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensating);
        assert_eq!(saga.error_message(), Some("second"));
    }

    #[test]
    fn test_fail_on_failed_saga_starts_pending_compensation() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        let create = step_id(&saga, "create_transaction");
        saga.start_step(create).unwrap();

        saga.fail("first").unwrap();
        assert_eq!(saga.status(), SagaStatus::Failed);

        // late completion of the step that was in flight
        saga.complete_step(create, None, Some("tx-1".into())).unwrap();
        saga.fail("second").unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensating);
        assert_eq!(saga.error_message(), Some("second"));
    }

    #[test]
    fn test_fail_terminal_saga_is_rejected() {
        let mut saga = transfer_saga();
        saga.abort("operator").unwrap();
        assert_eq!(
            saga.fail("late").unwrap_err(),
            DomainError::InvalidTransition {
                from: SagaStatus::Aborted,
                to: SagaStatus::Failed,
            }
        );
        assert_eq!(saga.error_message(), Some("operator"));
    }

    #[test]
    fn test_mark_compensated_requires_every_candidate() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "create_transaction");
        run_step(&mut saga, "debit_source");
        saga.fail("boom").unwrap();

        let debit = step_id(&saga, "debit_source");
        saga.begin_step_compensation(debit).unwrap();
        saga.finish_step_compensation(debit).unwrap();

        assert_eq!(
            saga.mark_compensated().unwrap_err(),
            DomainError::CompensationIncomplete {
                steps: vec!["create_transaction".into()],
            }
        );

        let create = step_id(&saga, "create_transaction");
        saga.begin_step_compensation(create).unwrap();
        saga.finish_step_compensation(create).unwrap();
        assert!(saga.is_fully_compensated());

        saga.mark_compensated().unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert!(saga.compensation_completed_at().is_some());
    }

    #[test]
    fn test_abandoned_compensation_stays_pending() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "debit_source");
        saga.fail("boom").unwrap();

        let debit = step_id(&saga, "debit_source");
        saga.begin_step_compensation(debit).unwrap();
        saga.abandon_step_compensation(debit, "unavailable").unwrap();
        assert_eq!(saga.pending_compensations(), vec![debit]);
        assert!(saga.mark_compensated().is_err());
    }

    #[test]
    fn test_renewing_a_claim_restamps_it() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "debit_source");
        saga.fail("boom").unwrap();

        let debit = step_id(&saga, "debit_source");
        assert!(matches!(
            saga.renew_step_compensation(debit),
            Err(DomainError::InvalidStepTransition { .. })
        ));

        saga.begin_step_compensation(debit).unwrap();
        let first = saga.step(debit).unwrap().compensation_started_at().unwrap();
        saga.renew_step_compensation(debit).unwrap();
        let step = saga.step(debit).unwrap();
        assert_eq!(step.status(), StepStatus::Compensating);
        assert!(step.compensation_started_at().unwrap() >= first);
    }

    #[test]
    fn test_step_compensation_requires_compensating_saga() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "debit_source");
        let debit = step_id(&saga, "debit_source");
        assert!(matches!(
            saga.begin_step_compensation(debit),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_abort_never_compensates() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        run_step(&mut saga, "debit_source");
        saga.abort("manual stop").unwrap();
        assert_eq!(saga.status(), SagaStatus::Aborted);
        assert_eq!(
            saga.step_by_name("debit_source").unwrap().status(),
            StepStatus::Completed
        );
        assert!(saga.abort("again").is_err());
    }

    #[test]
    fn test_terminal_saga_is_immutable() {
        let mut saga = transfer_saga();
        saga.abort("stop").unwrap();
        let status = SagaStatus::Aborted;
        assert_eq!(
            saga.update_context("k", "v").unwrap_err(),
            DomainError::SagaTerminal { status }
        );
        assert_eq!(
            saga.add_step(SagaStep::new("x", StepType::Notify, 9, "s", "a"))
                .unwrap_err(),
            DomainError::SagaTerminal { status }
        );
        let id = step_id(&saga, "create_transaction");
        assert_eq!(
            saga.skip_step(id).unwrap_err(),
            DomainError::SagaTerminal { status }
        );
    }

    #[test]
    fn test_retry_consumes_budget() {
        let mut saga = transfer_saga().with_max_retry_attempts(1);
        saga.start().unwrap();
        saga.fail("first").unwrap();
        assert!(saga.needs_compensation());

        saga.retry().unwrap();
        assert_eq!(saga.status(), SagaStatus::InProgress);
        assert_eq!(saga.retry_count(), 1);
        assert!(saga.error_message().is_none());

        saga.fail("second").unwrap();
        assert!(!saga.can_retry());
        assert!(matches!(
            saga.retry(),
            Err(DomainError::RetryExhausted { .. })
        ));
    }

    #[test]
    fn test_start_step_requires_in_progress() {
        let mut saga = transfer_saga();
        let id = step_id(&saga, "create_transaction");
        assert!(saga.start_step(id).is_err());
        saga.start().unwrap();
        saga.start_step(id).unwrap();
        assert_eq!(saga.step(id).unwrap().status(), StepStatus::Executing);
    }

    #[test]
    fn test_unknown_step() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        let missing = StepId::new();
        assert_eq!(
            saga.start_step(missing).unwrap_err(),
            DomainError::StepNotFound(missing)
        );
    }

    #[test]
    fn test_is_stuck() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        let later = Utc::now() + chrono::Duration::minutes(1);
        assert!(saga.is_stuck(later));
        assert!(!saga.is_stuck(saga.started_at()));
        saga.abort("x").unwrap();
        assert!(!saga.is_stuck(later));
    }

    #[test]
    fn test_serialization_round_trip_preserves_state() {
        let mut saga = transfer_saga();
        saga.start().unwrap();
        saga.update_context("processInstanceId", "wf-1").unwrap();
        run_step(&mut saga, "create_transaction");

        let json = serde_json::to_value(&saga).unwrap();
        assert_eq!(json["status"], "IN_PROGRESS");
        let restored: Saga = serde_json::from_value(json).unwrap();
        assert_eq!(restored, saga);
    }
}
