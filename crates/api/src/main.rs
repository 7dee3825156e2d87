//! Saga orchestrator server entry point.

use std::error::Error;
use std::sync::Arc;

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::clients::{HttpAccountClient, HttpTransactionClient, ServiceEndpoints};
use saga::{OrchestrationConfig, StepExecutor};
use saga_store::{InMemorySagaRepository, PostgresSagaRepository, SagaRepository};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn serve<R: SagaRepository + 'static>(
    config: &Config,
    repository: R,
    executor: StepExecutor,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let (state, worker) =
        api::create_state(repository, executor, OrchestrationConfig::from_env());
    let worker = worker.spawn();
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting saga orchestrator");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let endpoints = ServiceEndpoints::from_env();
    tracing::info!(
        transaction_service = %endpoints.transaction_service_url,
        account_service = %endpoints.account_service_url,
        "remote service endpoints"
    );
    let executor = StepExecutor::new(
        Arc::new(HttpTransactionClient::new(&endpoints)?),
        Arc::new(HttpAccountClient::new(&endpoints)?),
    );

    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let repository = PostgresSagaRepository::new(pool);
            repository.run_migrations().await?;
            tracing::info!("using PostgreSQL saga repository");
            serve(&config, repository, executor, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sagas are kept in memory");
            serve(&config, InMemorySagaRepository::new(), executor, metrics_handle).await
        }
    }
}
