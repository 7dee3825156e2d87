//! Saga coordinator: starts sagas from their definitions and routes step
//! callbacks back into the domain service.

use std::collections::HashMap;
use std::sync::Arc;

use common::{SagaId, StepId};
use domain::{DomainError, Saga, SagaStatus, ValidationResult};
use saga_store::SagaRepository;
use serde::Deserialize;

use crate::compensation::CompensationOutcome;
use crate::definitions::SagaDefinitions;
use crate::error::{Result, SagaError};
use crate::gateway::{StepCallback, WorkflowGateway, context_keys};
use crate::service::SagaDomainService;

/// Request to start a saga of a registered type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSagaRequest {
    pub business_key: String,
    pub saga_type: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Drives sagas forward: one step at a time, then completion or compensation.
pub struct SagaCoordinator<R, G> {
    service: Arc<SagaDomainService<R, G>>,
    definitions: SagaDefinitions,
}

impl<R, G> SagaCoordinator<R, G>
where
    R: SagaRepository,
    G: WorkflowGateway,
{
    pub fn new(service: Arc<SagaDomainService<R, G>>, definitions: SagaDefinitions) -> Self {
        Self {
            service,
            definitions,
        }
    }

    pub fn service(&self) -> &SagaDomainService<R, G> {
        &self.service
    }

    pub fn definitions(&self) -> &SagaDefinitions {
        &self.definitions
    }

    /// Creates a saga from its definition, starts it and dispatches the first
    /// step.
    #[tracing::instrument(
        skip(self, request),
        fields(business_key = %request.business_key, saga_type = %request.saga_type)
    )]
    pub async fn start_saga(&self, request: StartSagaRequest) -> Result<Saga> {
        if request.saga_type.trim().is_empty() {
            return Err(SagaError::MissingField("sagaType"));
        }
        let definition = self.definitions.get(&request.saga_type)?;

        let saga = self
            .service
            .create_saga(
                &request.business_key,
                definition.saga_type(),
                request.correlation_id,
            )
            .await?;
        let saga_id = saga.id();

        for (key, value) in &request.context {
            self.service.update_saga_context(saga_id, key, value).await?;
        }
        for step in definition.build_steps() {
            self.service.add_step_to_saga(saga_id, step).await?;
        }

        let saga = self.service.find_saga(saga_id).await?;
        if let ValidationResult::Invalid(reason) = self.service.validate_saga_execution(&saga) {
            self.service.abort_saga(saga_id, &reason).await?;
            return Err(SagaError::InvalidExecution(reason));
        }

        self.service.start_saga(saga_id).await?;
        self.dispatch_next(saga_id).await
    }

    /// Applies a step outcome reported by the gateway.
    #[tracing::instrument(
        skip(self, callback),
        fields(saga_id = %callback.saga_id(), step_id = %callback.step_id())
    )]
    pub async fn handle_callback(&self, callback: StepCallback) -> Result<Saga> {
        match callback {
            StepCallback::Completed {
                saga_id,
                step_id,
                output,
                compensation_data,
            } => {
                self.service
                    .record_step_completed(saga_id, step_id, output, compensation_data)
                    .await?;
                self.dispatch_next(saga_id).await
            }
            StepCallback::Failed {
                saga_id,
                step_id,
                error,
            } => {
                let saga = self
                    .service
                    .record_step_failed(saga_id, step_id, &error)
                    .await?;
                self.compensate_if_needed(saga).await
            }
        }
    }

    /// Compensates a failed or compensating saga on operator request.
    #[tracing::instrument(skip(self))]
    pub async fn force_compensate(&self, saga_id: SagaId) -> Result<CompensationOutcome> {
        let saga = self.service.find_saga(saga_id).await?;
        if saga.status() == SagaStatus::Failed {
            self.service.start_compensation(saga_id).await?;
        }
        self.service.compensate_saga(saga_id).await
    }

    /// Retries a failed step and dispatches it again.
    #[tracing::instrument(skip(self))]
    pub async fn retry_step(&self, saga_id: SagaId, step_id: StepId) -> Result<Saga> {
        self.service.retry_step(saga_id, step_id).await?;
        self.dispatch_next(saga_id).await
    }

    /// Dispatches the next pending step, or completes the saga when none is
    /// left.
    async fn dispatch_next(&self, saga_id: SagaId) -> Result<Saga> {
        let saga = self.service.find_saga(saga_id).await?;
        if saga.status() != SagaStatus::InProgress {
            return Ok(saga);
        }

        let Some(step_id) = saga.next_pending_step().map(|step| step.id()) else {
            return self.service.complete_saga(saga_id).await;
        };

        let saga = self.service.record_step_started(saga_id, step_id).await?;
        let Some(step) = saga.step(step_id) else {
            return Err(SagaError::StepNotFound { saga_id, step_id });
        };

        match self
            .service
            .gateway()
            .start_step_execution(&saga, step, saga.context())
            .await
        {
            Ok(handle) => {
                tracing::info!(%saga_id, step = step.name(), %handle, "saga step dispatched");
                let recorded = self
                    .service
                    .update_saga_context(
                        saga_id,
                        context_keys::PROCESS_INSTANCE_ID,
                        handle.as_str(),
                    )
                    .await;
                match recorded {
                    Ok(saga) => Ok(saga),
                    // The step already finished the saga.
                    Err(SagaError::Domain(DomainError::SagaTerminal { .. })) => {
                        self.service.find_saga(saga_id).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                tracing::warn!(%saga_id, step = step.name(), error = %e, "step dispatch failed");
                let saga = self
                    .service
                    .record_step_failed(saga_id, step_id, &e.to_string())
                    .await?;
                self.compensate_if_needed(saga).await
            }
        }
    }

    async fn compensate_if_needed(&self, saga: Saga) -> Result<Saga> {
        if saga.status() != SagaStatus::Compensating {
            return Ok(saga);
        }
        Ok(self.service.compensate_saga(saga.id()).await?.saga)
    }
}
