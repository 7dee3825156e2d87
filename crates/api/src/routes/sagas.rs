//! Saga endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::SagaId;
use domain::Saga;
use saga::{
    CompensationOutcome, InProcessWorkflowGateway, SagaCoordinator, SagaDomainService,
    SagaHealth, StartSagaRequest,
};
use saga_store::SagaRepository;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<R> {
    pub coordinator: Arc<SagaCoordinator<R, InProcessWorkflowGateway>>,
}

impl<R: SagaRepository> AppState<R> {
    pub fn service(&self) -> &SagaDomainService<R, InProcessWorkflowGateway> {
        self.coordinator.service()
    }
}

// -- Response types --

/// Read model of a saga.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaResponse {
    pub saga_id: String,
    pub business_key: String,
    pub saga_type: String,
    pub status: String,
    pub correlation_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub context: HashMap<String, String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retry_attempts: u32,
}

impl From<&Saga> for SagaResponse {
    fn from(saga: &Saga) -> Self {
        Self {
            saga_id: saga.id().to_string(),
            business_key: saga.business_key().to_string(),
            saga_type: saga.saga_type().to_string(),
            status: saga.status().to_string(),
            correlation_id: saga.correlation_id().map(str::to_string),
            started_at: saga.started_at(),
            completed_at: saga.completed_at(),
            context: saga.context().clone(),
            error_message: saga.error_message().map(str::to_string),
            retry_count: saga.retry_count(),
            max_retry_attempts: saga.max_retry_attempts(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationResponse {
    pub saga: SagaResponse,
    pub compensated_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub in_flight_steps: Vec<String>,
    pub fully_compensated: bool,
}

impl From<CompensationOutcome> for CompensationResponse {
    fn from(outcome: CompensationOutcome) -> Self {
        Self {
            saga: SagaResponse::from(&outcome.saga),
            compensated_steps: outcome.compensated_steps,
            failed_steps: outcome.failed_steps,
            in_flight_steps: outcome.in_flight_steps,
            fully_compensated: outcome.fully_compensated,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AbortParams {
    pub reason: Option<String>,
}

fn list(sagas: Vec<Saga>) -> Json<Vec<SagaResponse>> {
    Json(sagas.iter().map(SagaResponse::from).collect())
}

pub(crate) fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga ID: {e}")))
}

// -- Handlers --

/// POST /api/v1/sagas
#[tracing::instrument(skip(state, request), fields(business_key = %request.business_key))]
pub async fn start<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Json(request): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaResponse>), ApiError> {
    let saga = state.coordinator.start_saga(request).await?;
    Ok((StatusCode::CREATED, Json(SagaResponse::from(&saga))))
}

/// GET /api/v1/sagas/{id}
#[tracing::instrument(skip(state))]
pub async fn get<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga = state.service().find_saga(parse_saga_id(&id)?).await?;
    Ok(Json(SagaResponse::from(&saga)))
}

/// GET /api/v1/sagas/business-key/{key}
#[tracing::instrument(skip(state))]
pub async fn get_by_business_key<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(key): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga = state
        .service()
        .find_by_business_key(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No saga with business key '{key}'")))?;
    Ok(Json(SagaResponse::from(&saga)))
}

/// GET /api/v1/sagas/active
pub async fn active<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<Vec<SagaResponse>>, ApiError> {
    Ok(list(state.service().find_active_sagas().await?))
}

/// GET /api/v1/sagas/compensation-needed
pub async fn compensation_needed<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<Vec<SagaResponse>>, ApiError> {
    Ok(list(state.service().find_sagas_needing_compensation().await?))
}

/// GET /api/v1/sagas/stuck
pub async fn stuck<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<Vec<SagaResponse>>, ApiError> {
    Ok(list(state.service().find_stuck_sagas().await?))
}

/// GET /api/v1/sagas/health
pub async fn health<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<SagaHealth>, ApiError> {
    Ok(Json(state.service().saga_health().await?))
}

/// POST /api/v1/sagas/{id}/abort?reason=...
#[tracing::instrument(skip(state))]
pub async fn abort<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Query(params): Query<AbortParams>,
) -> Result<Json<SagaResponse>, ApiError> {
    let reason = params
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Aborted by operator".to_string());
    let saga = state
        .service()
        .abort_saga(parse_saga_id(&id)?, &reason)
        .await?;
    Ok(Json(SagaResponse::from(&saga)))
}

/// POST /api/v1/sagas/{id}/compensate
#[tracing::instrument(skip(state))]
pub async fn compensate<R: SagaRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<CompensationResponse>, ApiError> {
    let outcome = state
        .coordinator
        .force_compensate(parse_saga_id(&id)?)
        .await?;
    Ok(Json(CompensationResponse::from(outcome)))
}
