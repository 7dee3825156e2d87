use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use domain::{Saga, SagaStatus};

use crate::{Result, StoreError};

/// Core trait for saga persistence.
///
/// Saves are optimistic: a saga at [`Version::initial`] is inserted, any other
/// saga is updated only if the stored version still equals the saga's version.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Persists the saga and returns its new version.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version moved on, and
    /// with `DuplicateBusinessKey` if a new saga reuses an existing key.
    async fn save(&self, saga: &Saga) -> Result<Version>;

    async fn find_by_id(&self, id: SagaId) -> Result<Option<Saga>>;

    async fn find_by_business_key(&self, business_key: &str) -> Result<Option<Saga>>;

    async fn exists_by_business_key(&self, business_key: &str) -> Result<bool>;

    /// Sagas in any non-terminal status, oldest first.
    async fn find_active_sagas(&self) -> Result<Vec<Saga>>;

    /// Failed sagas that still have retry budget, oldest first.
    async fn find_sagas_needing_compensation(&self) -> Result<Vec<Saga>>;

    /// Non-terminal sagas that started before `before`, oldest first.
    async fn find_stuck_sagas(&self, before: DateTime<Utc>) -> Result<Vec<Saga>>;

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>>;

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>>;

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64>;
}

/// Extension trait providing convenience methods for saga repositories.
#[async_trait]
pub trait SagaRepositoryExt: SagaRepository {
    /// Loads a saga, failing with `SagaNotFound` if it does not exist.
    async fn load(&self, id: SagaId) -> Result<Saga> {
        self.find_by_id(id)
            .await?
            .ok_or(StoreError::SagaNotFound(id))
    }

    /// Saves the saga and writes the new version back into it.
    async fn save_and_bump(&self, saga: &mut Saga) -> Result<Version> {
        let version = self.save(saga).await?;
        saga.set_version(version);
        Ok(version)
    }
}

// Blanket implementation for all SagaRepository implementations
impl<T: SagaRepository + ?Sized> SagaRepositoryExt for T {}
