//! Saga step endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::StepId;
use domain::SagaStep;
use saga_store::SagaRepository;
use serde::Serialize;

use super::sagas::{AppState, SagaResponse, parse_saga_id};
use crate::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub step_id: String,
    pub name: String,
    pub step_type: String,
    pub sequence_order: u32,
    pub status: String,
    pub service_name: String,
    pub action_name: String,
    pub compensation_action: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl From<&SagaStep> for StepResponse {
    fn from(step: &SagaStep) -> Self {
        Self {
            step_id: step.id().to_string(),
            name: step.name().to_string(),
            step_type: step.step_type().to_string(),
            sequence_order: step.sequence_order(),
            status: step.status().to_string(),
            service_name: step.service_name().to_string(),
            action_name: step.action_name().to_string(),
            compensation_action: step.compensation_action().map(str::to_string),
            started_at: step.started_at(),
            completed_at: step.completed_at(),
            output: step.output().map(str::to_string),
            error_message: step.error_message().map(str::to_string),
            retry_count: step.retry_count(),
        }
    }
}

/// GET /api/v1/sagas/{id}/steps
#[tracing::instrument(skip(state))]
pub async fn list<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StepResponse>>, ApiError> {
    let steps = state.service().list_steps(parse_saga_id(&id)?).await?;
    Ok(Json(steps.iter().map(StepResponse::from).collect()))
}

/// POST /api/v1/sagas/{id}/steps/{step_id}/retry
#[tracing::instrument(skip(state))]
pub async fn retry<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path((id, step_id)): Path<(String, String)>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let step_id: StepId = step_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid step ID: {e}")))?;
    let saga = state.coordinator.retry_step(saga_id, step_id).await?;
    Ok(Json(SagaResponse::from(&saga)))
}
