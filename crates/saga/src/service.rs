//! Saga domain service: every saga state change goes through here.
//!
//! Each mutation is one load → apply → save unit. Saves are optimistic, so
//! a mutation that loses a race reloads the saga and re-applies itself, up to
//! [`OrchestrationConfig::max_conflict_retries`] times. Nothing is held across
//! a remote call.

use common::{SagaId, StepId};
use domain::{Saga, SagaStatus, SagaStep, ValidationResult, validate_execution};
use saga_store::{SagaRepository, SagaRepositoryExt};
use serde::Serialize;

use crate::config::OrchestrationConfig;
use crate::error::{Result, SagaError};
use crate::gateway::WorkflowGateway;

/// Counts reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaHealth {
    pub active_sagas: usize,
    pub sagas_needing_compensation: usize,
    pub stuck_sagas: usize,
}

/// Orchestration engine over a saga repository and a workflow gateway.
pub struct SagaDomainService<R, G> {
    repository: R,
    gateway: G,
    config: OrchestrationConfig,
}

impl<R, G> SagaDomainService<R, G>
where
    R: SagaRepository,
    G: WorkflowGateway,
{
    pub fn new(repository: R, gateway: G, config: OrchestrationConfig) -> Self {
        Self {
            repository,
            gateway,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Loads the saga, applies `apply` and saves it.
    pub(crate) async fn mutate<F>(&self, saga_id: SagaId, mut apply: F) -> Result<Saga>
    where
        F: FnMut(&mut Saga) -> Result<()> + Send,
    {
        self.mutate_if(saga_id, |saga| apply(saga).map(|()| true)).await
    }

    /// Like [`mutate`](Self::mutate), but only saves when `apply` returns
    /// `true`.
    pub(crate) async fn mutate_if<F>(&self, saga_id: SagaId, mut apply: F) -> Result<Saga>
    where
        F: FnMut(&mut Saga) -> Result<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut saga = self.repository.load(saga_id).await?;
            if !apply(&mut saga)? {
                return Ok(saga);
            }

            match self.repository.save_and_bump(&mut saga).await {
                Ok(_) => return Ok(saga),
                Err(e) if e.is_conflict() => {
                    metrics::counter!("saga_concurrency_conflicts_total").increment(1);
                    if attempt >= self.config.max_conflict_retries {
                        tracing::warn!(%saga_id, attempt, "giving up after repeated conflicts");
                        return Err(e.into());
                    }
                    attempt += 1;
                    tracing::debug!(%saga_id, attempt, "concurrent modification, reloading saga");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Creates and persists a new saga in `Started` status.
    #[tracing::instrument(skip(self))]
    pub async fn create_saga(
        &self,
        business_key: &str,
        saga_type: &str,
        correlation_id: Option<String>,
    ) -> Result<Saga> {
        if business_key.trim().is_empty() {
            return Err(SagaError::MissingField("businessKey"));
        }
        if saga_type.trim().is_empty() {
            return Err(SagaError::MissingField("sagaType"));
        }
        if self.repository.exists_by_business_key(business_key).await? {
            return Err(SagaError::DuplicateBusinessKey(business_key.to_string()));
        }

        let mut saga = Saga::new(business_key, saga_type, correlation_id)
            .with_max_retry_attempts(self.config.max_retry_attempts);
        self.repository.save_and_bump(&mut saga).await?;

        metrics::counter!("saga_created_total").increment(1);
        tracing::info!(saga_id = %saga.id(), "saga created");
        Ok(saga)
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_saga(&self, saga_id: SagaId) -> Result<Saga> {
        let saga = self.mutate(saga_id, |saga| Ok(saga.start()?)).await?;
        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%saga_id, "saga started");
        Ok(saga)
    }

    #[tracing::instrument(skip(self, step), fields(step = step.name()))]
    pub async fn add_step_to_saga(&self, saga_id: SagaId, step: SagaStep) -> Result<Saga> {
        self.mutate(saga_id, |saga| Ok(saga.add_step(step.clone())?))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_saga(&self, saga_id: SagaId) -> Result<Saga> {
        let saga = self.mutate(saga_id, |saga| Ok(saga.complete()?)).await?;
        metrics::counter!("saga_completed_total").increment(1);
        record_duration(&saga);
        tracing::info!(%saga_id, "saga completed");
        Ok(saga)
    }

    /// Fails the saga. Compensation starts automatically when completed steps
    /// exist.
    #[tracing::instrument(skip(self))]
    pub async fn fail_saga(&self, saga_id: SagaId, error_message: &str) -> Result<Saga> {
        let saga = self
            .mutate(saga_id, |saga| Ok(saga.fail(error_message)?))
            .await?;
        metrics::counter!("saga_failed_total").increment(1);
        tracing::info!(%saga_id, status = %saga.status(), "saga failed");
        Ok(saga)
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_compensation(&self, saga_id: SagaId) -> Result<Saga> {
        let saga = self
            .mutate(saga_id, |saga| Ok(saga.start_compensation()?))
            .await?;
        tracing::info!(%saga_id, "saga compensation started");
        Ok(saga)
    }

    #[tracing::instrument(skip(self))]
    pub async fn abort_saga(&self, saga_id: SagaId, reason: &str) -> Result<Saga> {
        let saga = self.mutate(saga_id, |saga| Ok(saga.abort(reason)?)).await?;
        metrics::counter!("saga_aborted_total").increment(1);
        record_duration(&saga);
        tracing::info!(%saga_id, "saga aborted");
        Ok(saga)
    }

    /// Sets one context entry; the last write wins.
    #[tracing::instrument(skip(self, value))]
    pub async fn update_saga_context(
        &self,
        saga_id: SagaId,
        key: &str,
        value: &str,
    ) -> Result<Saga> {
        self.mutate(saga_id, |saga| Ok(saga.update_context(key, value)?))
            .await
    }

    pub fn validate_saga_execution(&self, saga: &Saga) -> ValidationResult {
        validate_execution(saga)
    }

    // Step lifecycle

    #[tracing::instrument(skip(self))]
    pub async fn record_step_started(&self, saga_id: SagaId, step_id: StepId) -> Result<Saga> {
        self.mutate(saga_id, |saga| {
            require_step(saga, step_id)?;
            Ok(saga.start_step(step_id)?)
        })
        .await
    }

    #[tracing::instrument(skip(self, output, compensation_data))]
    pub async fn record_step_completed(
        &self,
        saga_id: SagaId,
        step_id: StepId,
        output: Option<String>,
        compensation_data: Option<String>,
    ) -> Result<Saga> {
        let saga = self
            .mutate(saga_id, |saga| {
                require_step(saga, step_id)?;
                Ok(saga.complete_step(step_id, output.clone(), compensation_data.clone())?)
            })
            .await?;
        tracing::info!(%saga_id, %step_id, "saga step completed");
        Ok(saga)
    }

    /// Fails the step and then the saga, in one write.
    #[tracing::instrument(skip(self))]
    pub async fn record_step_failed(
        &self,
        saga_id: SagaId,
        step_id: StepId,
        error: &str,
    ) -> Result<Saga> {
        let saga = self
            .mutate(saga_id, |saga| {
                let name = require_step(saga, step_id)?.name().to_string();
                saga.fail_step(step_id, error)?;
                Ok(saga.fail(format!("Step '{name}' failed: {error}"))?)
            })
            .await?;
        metrics::counter!("saga_failed_total").increment(1);
        tracing::warn!(%saga_id, %step_id, status = %saga.status(), "saga step failed");
        Ok(saga)
    }

    #[tracing::instrument(skip(self))]
    pub async fn skip_step(&self, saga_id: SagaId, step_id: StepId) -> Result<Saga> {
        self.mutate(saga_id, |saga| {
            require_step(saga, step_id)?;
            Ok(saga.skip_step(step_id)?)
        })
        .await
    }

    /// Resets a failed step and puts the saga back in progress.
    #[tracing::instrument(skip(self))]
    pub async fn retry_step(&self, saga_id: SagaId, step_id: StepId) -> Result<Saga> {
        let saga = self
            .mutate(saga_id, |saga| {
                if saga.status() != SagaStatus::Failed {
                    return Err(SagaError::InvalidState {
                        expected: SagaStatus::Failed,
                        actual: saga.status(),
                    });
                }
                require_step(saga, step_id)?;
                saga.retry()?;
                Ok(saga.reset_step_for_retry(step_id)?)
            })
            .await?;
        tracing::info!(%saga_id, %step_id, retry_count = saga.retry_count(), "saga step retried");
        Ok(saga)
    }

    pub async fn find_step(&self, saga_id: SagaId, step_id: StepId) -> Result<SagaStep> {
        let saga = self.find_saga(saga_id).await?;
        require_step(&saga, step_id).cloned()
    }

    /// Steps of the saga ordered by sequence.
    pub async fn list_steps(&self, saga_id: SagaId) -> Result<Vec<SagaStep>> {
        Ok(self.find_saga(saga_id).await?.steps().to_vec())
    }

    // Queries

    pub async fn find_saga(&self, saga_id: SagaId) -> Result<Saga> {
        Ok(self.repository.load(saga_id).await?)
    }

    pub async fn find_by_business_key(&self, business_key: &str) -> Result<Option<Saga>> {
        Ok(self.repository.find_by_business_key(business_key).await?)
    }

    pub async fn find_active_sagas(&self) -> Result<Vec<Saga>> {
        Ok(self.repository.find_active_sagas().await?)
    }

    pub async fn find_sagas_needing_compensation(&self) -> Result<Vec<Saga>> {
        Ok(self.repository.find_sagas_needing_compensation().await?)
    }

    /// Active sagas older than the configured stuck threshold.
    pub async fn find_stuck_sagas(&self) -> Result<Vec<Saga>> {
        Ok(self
            .repository
            .find_stuck_sagas(self.config.stuck_cutoff())
            .await?)
    }

    pub async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        Ok(self.repository.find_by_correlation_id(correlation_id).await?)
    }

    pub async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>> {
        Ok(self.repository.find_by_status(status).await?)
    }

    pub async fn saga_health(&self) -> Result<SagaHealth> {
        Ok(SagaHealth {
            active_sagas: self.find_active_sagas().await?.len(),
            sagas_needing_compensation: self.find_sagas_needing_compensation().await?.len(),
            stuck_sagas: self.find_stuck_sagas().await?.len(),
        })
    }
}

pub(crate) fn require_step(saga: &Saga, step_id: StepId) -> Result<&SagaStep> {
    saga.step(step_id).ok_or(SagaError::StepNotFound {
        saga_id: saga.id(),
        step_id,
    })
}

pub(crate) fn record_duration(saga: &Saga) {
    if let Some(duration) = saga.duration() {
        let secs = duration.num_milliseconds() as f64 / 1000.0;
        metrics::histogram!("saga_duration_seconds").record(secs);
    }
}
