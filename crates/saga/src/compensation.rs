//! Compensation protocol.
//!
//! Candidates are undone most-recent-first. Every step is claimed
//! (`Completed` → `Compensating`) and persisted before the remote call, and
//! the outcome is written in a separate unit afterwards, so no saga state is
//! held while the remote service works. A claim older than the configured
//! compensation lease may be taken over by another caller. A failed attempt returns the step to
//! `Completed`; calling [`SagaDomainService::compensate_saga`] again picks up
//! where the last call stopped.

use common::{SagaId, StepId};
use domain::{Saga, SagaStatus, StepStatus};
use saga_store::SagaRepository;
use serde::Serialize;

use crate::clients::RemoteResponse;
use crate::error::{Result, SagaError};
use crate::gateway::WorkflowGateway;
use crate::service::{SagaDomainService, record_duration, require_step};

/// Result of one compensation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationOutcome {
    pub saga: Saga,
    /// Steps undone during this pass, in the order they were undone.
    pub compensated_steps: Vec<String>,
    /// Steps whose compensation action failed; they stay `Completed`.
    pub failed_steps: Vec<String>,
    /// Steps another caller is compensating right now.
    pub in_flight_steps: Vec<String>,
    pub fully_compensated: bool,
}

impl CompensationOutcome {
    fn unchanged(saga: Saga) -> Self {
        Self {
            fully_compensated: saga.status() == SagaStatus::Compensated,
            saga,
            compensated_steps: Vec::new(),
            failed_steps: Vec::new(),
            in_flight_steps: Vec::new(),
        }
    }
}

enum Claim {
    Unclaimed,
    Fresh,
    TakenOver,
}

enum StepResult {
    Compensated,
    Failed,
    InFlight,
    AlreadyDone,
}

fn ensure_compensating(saga: &Saga) -> Result<()> {
    if saga.status() != SagaStatus::Compensating {
        return Err(SagaError::InvalidState {
            expected: SagaStatus::Compensating,
            actual: saga.status(),
        });
    }
    Ok(())
}

/// True while the step is still waiting on the outcome of a claimed attempt.
fn holds_claim(saga: &Saga, step_id: StepId) -> Result<bool> {
    Ok(saga.status() == SagaStatus::Compensating
        && require_step(saga, step_id)?.status() == StepStatus::Compensating)
}

impl<R, G> SagaDomainService<R, G>
where
    R: SagaRepository,
    G: WorkflowGateway,
{
    /// Drives every compensation candidate of a compensating saga to
    /// `Compensated`, then the saga itself.
    ///
    /// Idempotent: a compensated saga is returned unchanged, and steps that
    /// are already compensated are not touched again.
    #[tracing::instrument(skip(self))]
    pub async fn compensate_saga(&self, saga_id: SagaId) -> Result<CompensationOutcome> {
        let saga = self.find_saga(saga_id).await?;
        match saga.status() {
            SagaStatus::Compensated => return Ok(CompensationOutcome::unchanged(saga)),
            SagaStatus::Compensating => {}
            actual => {
                return Err(SagaError::InvalidState {
                    expected: SagaStatus::Compensating,
                    actual,
                });
            }
        }

        let mut outcome = CompensationOutcome::unchanged(saga.clone());
        for step_id in saga.pending_compensations() {
            let name = require_step(&saga, step_id)?.name().to_string();
            match self.compensate_step(saga_id, step_id).await? {
                StepResult::Compensated => outcome.compensated_steps.push(name),
                StepResult::Failed => outcome.failed_steps.push(name),
                StepResult::InFlight => outcome.in_flight_steps.push(name),
                StepResult::AlreadyDone => {}
            }
        }

        let saga = self
            .mutate_if(saga_id, |saga| {
                if saga.status() != SagaStatus::Compensating || !saga.is_fully_compensated() {
                    return Ok(false);
                }
                saga.mark_compensated()?;
                Ok(true)
            })
            .await?;

        outcome.fully_compensated = saga.status() == SagaStatus::Compensated;
        if outcome.fully_compensated {
            metrics::counter!("saga_compensated_total").increment(1);
            record_duration(&saga);
            tracing::info!(%saga_id, steps = outcome.compensated_steps.len(), "saga compensated");
        } else {
            tracing::warn!(
                %saga_id,
                failed = outcome.failed_steps.len(),
                in_flight = outcome.in_flight_steps.len(),
                "saga partially compensated"
            );
        }
        outcome.saga = saga;
        Ok(outcome)
    }

    async fn compensate_step(&self, saga_id: SagaId, step_id: StepId) -> Result<StepResult> {
        // Only the caller whose claim is persisted calls the remote service. A
        // claim older than the compensation lease is taken over the same way,
        // so two callers never both win it.
        let lapsed_before = self.config().lease_cutoff();
        let mut claim = Claim::Unclaimed;
        let saga = self
            .mutate_if(saga_id, |saga| {
                claim = Claim::Unclaimed;
                if saga.status() != SagaStatus::Compensating {
                    return Ok(false);
                }
                let step = require_step(saga, step_id)?;
                let status = step.status();
                let lapsed = step
                    .compensation_started_at()
                    .is_none_or(|started| started < lapsed_before);
                match status {
                    StepStatus::Completed => {
                        saga.begin_step_compensation(step_id)?;
                        claim = Claim::Fresh;
                    }
                    StepStatus::Compensating if lapsed => {
                        saga.renew_step_compensation(step_id)?;
                        claim = Claim::TakenOver;
                    }
                    _ => return Ok(false),
                }
                Ok(true)
            })
            .await?;

        let step = require_step(&saga, step_id)?;
        match claim {
            Claim::Unclaimed => {
                if saga.status() == SagaStatus::Compensated
                    || step.status() == StepStatus::Compensated
                {
                    return Ok(StepResult::AlreadyDone);
                }
                ensure_compensating(&saga)?;
                return Ok(StepResult::InFlight);
            }
            Claim::TakenOver => {
                tracing::warn!(%saga_id, step = step.name(), "resuming abandoned compensation");
            }
            Claim::Fresh => {}
        }

        let response = self.gateway().compensate_step(&saga, step).await;
        let step_name = step.name().to_string();

        match response {
            RemoteResponse::Success(()) => {
                self.mutate_if(saga_id, |saga| {
                    if !holds_claim(saga, step_id)? {
                        return Ok(false);
                    }
                    saga.finish_step_compensation(step_id)?;
                    Ok(true)
                })
                .await?;
                tracing::info!(%saga_id, step = %step_name, "step compensated");
                Ok(StepResult::Compensated)
            }
            failure => {
                let reason = match failure.into_result() {
                    Err(reason) => reason,
                    Ok(()) => String::new(),
                };
                metrics::counter!("saga_compensation_step_failures_total").increment(1);
                tracing::warn!(%saga_id, step = %step_name, %reason, "step compensation failed");

                self.mutate_if(saga_id, |saga| {
                    if !holds_claim(saga, step_id)? {
                        return Ok(false);
                    }
                    saga.abandon_step_compensation(step_id, reason.as_str())?;
                    Ok(true)
                })
                .await?;
                Ok(StepResult::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::OrchestrationConfig;
    use crate::service::tests::{run_step, service, service_with, started_saga, step};

    use super::*;

    #[tokio::test]
    async fn test_compensates_in_descending_order() {
        let (service, gateway) = service();
        let saga = started_saga(
            &service,
            vec![
                step("one", 1, Some("undo_one")),
                step("two", 2, None),
                step("three", 3, Some("undo_three")),
                step("four", 4, None),
            ],
        )
        .await;
        for name in ["one", "two", "three"] {
            run_step(&service, &saga, name).await;
        }
        let saga = service.fail_saga(saga.id(), "four broke").await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensating);

        let outcome = service.compensate_saga(saga.id()).await.unwrap();

        assert_eq!(gateway.compensated(), ["three", "one"]);
        assert_eq!(outcome.compensated_steps, ["three", "one"]);
        assert!(outcome.fully_compensated);
        let saga = outcome.saga;
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(saga.error_message(), Some("four broke"));
        assert!(saga.compensation_completed_at().is_some());
        assert_eq!(saga.step_by_name("one").unwrap().status(), StepStatus::Compensated);
        assert_eq!(saga.step_by_name("two").unwrap().status(), StepStatus::Completed);
        assert_eq!(saga.step_by_name("four").unwrap().status(), StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_partial_failure_leaves_saga_compensating() {
        let (service, gateway) = service();
        let saga = started_saga(
            &service,
            vec![step("one", 1, Some("undo")), step("two", 2, Some("undo"))],
        )
        .await;
        run_step(&service, &saga, "one").await;
        run_step(&service, &saga, "two").await;
        service.fail_saga(saga.id(), "late failure").await.unwrap();
        gateway.fail_compensation_of("one");

        let outcome = service.compensate_saga(saga.id()).await.unwrap();

        assert!(!outcome.fully_compensated);
        assert_eq!(outcome.compensated_steps, ["two"]);
        assert_eq!(outcome.failed_steps, ["one"]);
        let one = outcome.saga.step_by_name("one").unwrap();
        assert_eq!(outcome.saga.status(), SagaStatus::Compensating);
        assert_eq!(one.status(), StepStatus::Completed);
        assert_eq!(one.error_message(), Some("cannot undo one"));

        // Resuming only touches what is left.
        gateway.heal();
        let outcome = service.compensate_saga(saga.id()).await.unwrap();
        assert!(outcome.fully_compensated);
        assert_eq!(outcome.compensated_steps, ["one"]);
        assert_eq!(gateway.compensated(), ["two", "one"]);
    }

    #[tokio::test]
    async fn test_compensate_is_idempotent() {
        let (service, gateway) = service();
        let saga = started_saga(&service, vec![step("one", 1, Some("undo")), step("two", 2, None)])
            .await;
        run_step(&service, &saga, "one").await;
        service.fail_saga(saga.id(), "boom").await.unwrap();
        service.compensate_saga(saga.id()).await.unwrap();
        let version = service.find_saga(saga.id()).await.unwrap().version();

        let again = service.compensate_saga(saga.id()).await.unwrap();

        assert!(again.fully_compensated);
        assert!(again.compensated_steps.is_empty());
        assert_eq!(again.saga.status(), SagaStatus::Compensated);
        assert_eq!(again.saga.version(), version);
        assert_eq!(gateway.compensated(), ["one"]);
    }

    #[tokio::test]
    async fn test_compensate_requires_compensating_status() {
        let (service, _) = service();
        let saga = started_saga(&service, vec![step("one", 1, Some("undo"))]).await;

        let err = service.compensate_saga(saga.id()).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::InvalidState {
                expected: SagaStatus::Compensating,
                actual: SagaStatus::InProgress
            }
        ));
    }

    #[tokio::test]
    async fn test_compensating_without_candidates_completes_immediately() {
        let (service, gateway) = service();
        let saga = started_saga(&service, vec![step("one", 1, None)]).await;
        service.fail_saga(saga.id(), "boom").await.unwrap();
        service.start_compensation(saga.id()).await.unwrap();

        let outcome = service.compensate_saga(saga.id()).await.unwrap();
        assert!(outcome.fully_compensated);
        assert!(gateway.compensated().is_empty());
    }

    #[tokio::test]
    async fn test_slow_compensation_is_not_repeated_by_a_second_caller() {
        let (service, gateway) = service_with(OrchestrationConfig {
            stuck_saga_threshold: Duration::from_millis(50),
            ..OrchestrationConfig::default()
        });
        let service = Arc::new(service);
        let saga = started_saga(&service, vec![step("one", 1, Some("undo"))]).await;
        run_step(&service, &saga, "one").await;
        service.fail_saga(saga.id(), "boom").await.unwrap();
        gateway.slow_compensation(Duration::from_millis(200));
        let saga_id = saga.id();

        let first = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.compensate_saga(saga_id).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = service.compensate_saga(saga_id).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(gateway.compensation_calls(), 1);
        assert_eq!(second.in_flight_steps, ["one"]);
        assert!(!second.fully_compensated);
        assert_eq!(first.compensated_steps, ["one"]);
        assert!(first.fully_compensated);
    }

    #[tokio::test]
    async fn test_lapsed_claim_is_taken_over_exactly_once() {
        let (service, gateway) = service_with(OrchestrationConfig {
            compensation_lease: Duration::from_millis(50),
            ..OrchestrationConfig::default()
        });
        let saga = started_saga(&service, vec![step("one", 1, Some("undo"))]).await;
        run_step(&service, &saga, "one").await;
        service.fail_saga(saga.id(), "boom").await.unwrap();
        let saga_id = saga.id();
        let step_id = saga.step_by_name("one").unwrap().id();

        // A caller claimed the step and never reported back.
        service
            .mutate(saga_id, |saga| Ok(saga.begin_step_compensation(step_id)?))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        gateway.slow_compensation(Duration::from_millis(20));

        let (a, b) = tokio::join!(
            service.compensate_saga(saga_id),
            service.compensate_saga(saga_id)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(gateway.compensation_calls(), 1);
        assert_eq!(gateway.compensated(), ["one"]);
        assert!(a.fully_compensated || b.fully_compensated);
        let saga = service.find_saga(saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(
            saga.step_by_name("one").unwrap().status(),
            StepStatus::Compensated
        );
    }

    #[tokio::test]
    async fn test_fresh_claim_is_reported_in_flight() {
        let (service, gateway) = service();
        let saga = started_saga(&service, vec![step("one", 1, Some("undo"))]).await;
        run_step(&service, &saga, "one").await;
        service.fail_saga(saga.id(), "boom").await.unwrap();
        let step_id = saga.step_by_name("one").unwrap().id();
        service
            .mutate(saga.id(), |saga| Ok(saga.begin_step_compensation(step_id)?))
            .await
            .unwrap();

        let outcome = service.compensate_saga(saga.id()).await.unwrap();

        assert_eq!(outcome.in_flight_steps, ["one"]);
        assert!(!outcome.fully_compensated);
        assert_eq!(outcome.saga.status(), SagaStatus::Compensating);
        assert_eq!(gateway.compensation_calls(), 0);
    }
}
