//! HTTP surface of the saga orchestrator.
//!
//! Exposes saga start, lookup, abort, compensation and step retry over REST,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CallbackWorker, InProcessWorkflowGateway, OrchestrationConfig, SagaCoordinator,
    SagaDefinitions, SagaDomainService, StepExecutor,
};
use saga_store::SagaRepository;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::sagas::AppState;

/// Capacity of the step callback channel.
const CALLBACK_BUFFER: usize = 256;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R: SagaRepository + 'static>(
    state: Arc<AppState<R>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/api/v1/sagas", post(routes::sagas::start::<R>))
        .route("/api/v1/sagas/active", get(routes::sagas::active::<R>))
        .route(
            "/api/v1/sagas/compensation-needed",
            get(routes::sagas::compensation_needed::<R>),
        )
        .route("/api/v1/sagas/stuck", get(routes::sagas::stuck::<R>))
        .route("/api/v1/sagas/health", get(routes::sagas::health::<R>))
        .route(
            "/api/v1/sagas/business-key/{key}",
            get(routes::sagas::get_by_business_key::<R>),
        )
        .route("/api/v1/sagas/{id}", get(routes::sagas::get::<R>))
        .route("/api/v1/sagas/{id}/abort", post(routes::sagas::abort::<R>))
        .route(
            "/api/v1/sagas/{id}/compensate",
            post(routes::sagas::compensate::<R>),
        )
        .route("/api/v1/sagas/{id}/steps", get(routes::steps::list::<R>))
        .route(
            "/api/v1/sagas/{id}/steps/{step_id}/retry",
            post(routes::steps::retry::<R>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the orchestrator: domain service, in-process gateway, coordinator
/// and the worker that feeds step callbacks back into it.
///
/// The worker must be spawned for sagas to make progress.
pub fn create_state<R: SagaRepository + 'static>(
    repository: R,
    executor: StepExecutor,
    config: OrchestrationConfig,
) -> (
    Arc<AppState<R>>,
    CallbackWorker<R, InProcessWorkflowGateway>,
) {
    let (gateway, callbacks) = InProcessWorkflowGateway::with_channel(executor, CALLBACK_BUFFER);
    let service = Arc::new(SagaDomainService::new(repository, gateway, config));
    let coordinator = Arc::new(SagaCoordinator::new(service, SagaDefinitions::standard()));
    let worker = CallbackWorker::new(Arc::clone(&coordinator), callbacks);

    (Arc::new(AppState { coordinator }), worker)
}
