//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use domain::{Saga, SagaStatus, SagaStep, StepStatus, StepType};
use saga_store::{PostgresSagaRepository, SagaRepository, SagaRepositoryExt, StoreError};
use common::Version;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_sagas_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh repository with its own pool and an empty table
async fn get_test_repo() -> PostgresSagaRepository {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE sagas")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaRepository::new(pool)
}

fn transfer_saga(business_key: &str) -> Saga {
    let mut saga = Saga::new(business_key, "TRANSFER", Some("corr-pg".to_string()));
    saga.add_step(
        SagaStep::new(
            "debit_source",
            StepType::DebitAccount,
            1,
            "account-service",
            "withdraw",
        )
        .with_compensation("credit_source")
        .with_parameter("accountId", "acc-1"),
    )
    .unwrap();
    saga
}

#[tokio::test]
async fn save_and_load_round_trip() {
    let repo = get_test_repo().await;
    let mut saga = transfer_saga("PG-1");
    saga.update_context("amount", "100.00").unwrap();

    let version = repo.save_and_bump(&mut saga).await.unwrap();
    assert_eq!(version, Version::first());

    let loaded = repo.load(saga.id()).await.unwrap();
    assert_eq!(loaded.version(), Version::first());
    assert_eq!(loaded.business_key(), "PG-1");
    assert_eq!(loaded.context_value("amount"), Some("100.00"));
    assert_eq!(loaded.steps().len(), 1);
    assert_eq!(loaded.steps()[0].parameter("accountId"), Some("acc-1"));
}

#[tokio::test]
async fn update_bumps_version_and_columns() {
    let repo = get_test_repo().await;
    let mut saga = transfer_saga("PG-2");
    repo.save_and_bump(&mut saga).await.unwrap();

    saga.start().unwrap();
    let step_id = saga.steps()[0].id();
    saga.start_step(step_id).unwrap();
    saga.complete_step(step_id, Some("ok".into()), None).unwrap();
    let version = repo.save_and_bump(&mut saga).await.unwrap();
    assert_eq!(version, Version::new(2));

    let loaded = repo.find_by_business_key("PG-2").await.unwrap().unwrap();
    assert_eq!(loaded.status(), SagaStatus::InProgress);
    assert_eq!(loaded.steps()[0].status(), StepStatus::Completed);
    assert_eq!(
        repo.count_by_status(SagaStatus::InProgress).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn stale_update_is_a_conflict() {
    let repo = get_test_repo().await;
    let mut saga = transfer_saga("PG-3");
    repo.save_and_bump(&mut saga).await.unwrap();

    let mut first = repo.load(saga.id()).await.unwrap();
    let mut second = repo.load(saga.id()).await.unwrap();

    first.start().unwrap();
    repo.save(&first).await.unwrap();

    second.abort("operator").unwrap();
    let err = repo.save(&second).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::ConcurrencyConflict { expected, actual, .. }
            if expected == Version::first() && actual == Version::new(2)
    ));

    let stored = repo.load(saga.id()).await.unwrap();
    assert_eq!(stored.status(), SagaStatus::InProgress);
}

#[tokio::test]
async fn duplicate_business_key_is_rejected() {
    let repo = get_test_repo().await;
    repo.save(&transfer_saga("PG-4")).await.unwrap();

    let err = repo.save(&transfer_saga("PG-4")).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateBusinessKey(key) if key == "PG-4"));
    assert!(repo.exists_by_business_key("PG-4").await.unwrap());
    assert!(!repo.exists_by_business_key("PG-missing").await.unwrap());
}

#[tokio::test]
async fn status_queries() {
    let repo = get_test_repo().await;

    let mut running = transfer_saga("PG-running");
    running.start().unwrap();
    repo.save(&running).await.unwrap();

    let mut failed = transfer_saga("PG-failed");
    failed.start().unwrap();
    failed.fail("boom").unwrap();
    repo.save(&failed).await.unwrap();

    let mut exhausted = transfer_saga("PG-exhausted").with_max_retry_attempts(0);
    exhausted.start().unwrap();
    exhausted.fail("boom").unwrap();
    repo.save(&exhausted).await.unwrap();

    let mut aborted = transfer_saga("PG-aborted");
    aborted.abort("stop").unwrap();
    repo.save(&aborted).await.unwrap();

    let active = repo.find_active_sagas().await.unwrap();
    assert_eq!(active.len(), 3);
    assert!(active.iter().all(|s| !s.is_terminal()));

    let needing = repo.find_sagas_needing_compensation().await.unwrap();
    assert_eq!(needing.len(), 1);
    assert_eq!(needing[0].business_key(), "PG-failed");

    assert_eq!(
        repo.find_by_status(SagaStatus::Failed).await.unwrap().len(),
        2
    );
    assert_eq!(
        repo.find_by_correlation_id("corr-pg").await.unwrap().len(),
        4
    );

    let stuck = repo
        .find_stuck_sagas(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(stuck.len(), 3);
    assert!(
        repo.find_stuck_sagas(Utc::now() - Duration::hours(1))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn missing_saga() {
    let repo = get_test_repo().await;
    let saga = transfer_saga("PG-5");
    assert!(repo.find_by_id(saga.id()).await.unwrap().is_none());
    assert!(matches!(
        repo.load(saga.id()).await,
        Err(StoreError::SagaNotFound(id)) if id == saga.id()
    ));
}
