use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use domain::{Saga, SagaStatus};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{Result, SagaRepository, StoreError};

const SELECT_SAGAS: &str = "SELECT version, state FROM sagas";

const TERMINAL_STATUSES: [SagaStatus; 3] = [
    SagaStatus::Completed,
    SagaStatus::Compensated,
    SagaStatus::Aborted,
];

/// PostgreSQL-backed saga repository.
///
/// Each saga is one row: the full aggregate lives in a JSONB `state` column,
/// with the fields used by queries copied into indexed columns.
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    /// Creates a new PostgreSQL saga repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_saga(row: PgRow) -> Result<Saga> {
        let state: serde_json::Value = row.try_get("state")?;
        let mut saga: Saga = serde_json::from_value(state)?;
        saga.set_version(Version::new(row.try_get("version")?));
        Ok(saga)
    }

    fn terminal_statuses() -> Vec<String> {
        TERMINAL_STATUSES
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    async fn fetch_all(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Saga>> {
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn current_version(&self, id: SagaId) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM sagas WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.map(Version::new))
    }

    async fn insert(&self, saga: &Saga, state: serde_json::Value) -> Result<Version> {
        let version = Version::first();

        sqlx::query(
            r#"
            INSERT INTO sagas (id, business_key, saga_type, status, correlation_id, started_at,
                               retry_count, max_retry_attempts, version, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(saga.id().as_uuid())
        .bind(saga.business_key())
        .bind(saga.saga_type())
        .bind(saga.status().as_str())
        .bind(saga.correlation_id())
        .bind(saga.started_at())
        .bind(saga.retry_count() as i32)
        .bind(saga.max_retry_attempts() as i32)
        .bind(version.as_i64())
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("unique_business_key") => {
                        return StoreError::DuplicateBusinessKey(saga.business_key().to_string());
                    }
                    Some("sagas_pkey") => {
                        return StoreError::ConcurrencyConflict {
                            saga_id: saga.id(),
                            expected: Version::initial(),
                            actual: Version::first(),
                        };
                    }
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;

        Ok(version)
    }

    async fn update(&self, saga: &Saga, state: serde_json::Value) -> Result<Version> {
        let expected = saga.version();
        let next = expected.next();

        let result = sqlx::query(
            r#"
            UPDATE sagas
            SET status = $3, correlation_id = $4, started_at = $5, retry_count = $6,
                max_retry_attempts = $7, version = $8, state = $9, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(saga.id().as_uuid())
        .bind(expected.as_i64())
        .bind(saga.status().as_str())
        .bind(saga.correlation_id())
        .bind(saga.started_at())
        .bind(saga.retry_count() as i32)
        .bind(saga.max_retry_attempts() as i32)
        .bind(next.as_i64())
        .bind(state)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.current_version(saga.id()).await? {
                Some(actual) => Err(StoreError::ConcurrencyConflict {
                    saga_id: saga.id(),
                    expected,
                    actual,
                }),
                None => Err(StoreError::SagaNotFound(saga.id())),
            };
        }

        Ok(next)
    }
}

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    async fn save(&self, saga: &Saga) -> Result<Version> {
        let state = serde_json::to_value(saga)?;

        if saga.version() == Version::initial() {
            self.insert(saga, state).await
        } else {
            self.update(saga, state).await
        }
    }

    async fn find_by_id(&self, id: SagaId) -> Result<Option<Saga>> {
        let row: Option<PgRow> = sqlx::query(&format!("{SELECT_SAGAS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn find_by_business_key(&self, business_key: &str) -> Result<Option<Saga>> {
        let row: Option<PgRow> = sqlx::query(&format!("{SELECT_SAGAS} WHERE business_key = $1"))
            .bind(business_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn exists_by_business_key(&self, business_key: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sagas WHERE business_key = $1)")
                .bind(business_key)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn find_active_sagas(&self) -> Result<Vec<Saga>> {
        let sql = format!("{SELECT_SAGAS} WHERE status <> ALL($1) ORDER BY started_at ASC");
        self.fetch_all(sqlx::query(&sql).bind(Self::terminal_statuses()))
            .await
    }

    async fn find_sagas_needing_compensation(&self) -> Result<Vec<Saga>> {
        let sql = format!(
            "{SELECT_SAGAS} WHERE status = $1 AND retry_count < max_retry_attempts \
             ORDER BY started_at ASC"
        );
        self.fetch_all(sqlx::query(&sql).bind(SagaStatus::Failed.as_str()))
            .await
    }

    async fn find_stuck_sagas(&self, before: DateTime<Utc>) -> Result<Vec<Saga>> {
        let sql = format!(
            "{SELECT_SAGAS} WHERE started_at < $1 AND status <> ALL($2) ORDER BY started_at ASC"
        );
        self.fetch_all(
            sqlx::query(&sql)
                .bind(before)
                .bind(Self::terminal_statuses()),
        )
        .await
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        let sql = format!("{SELECT_SAGAS} WHERE correlation_id = $1 ORDER BY started_at ASC");
        self.fetch_all(sqlx::query(&sql).bind(correlation_id)).await
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>> {
        let sql = format!("{SELECT_SAGAS} WHERE status = $1 ORDER BY started_at ASC");
        self.fetch_all(sqlx::query(&sql).bind(status.as_str())).await
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sagas WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
