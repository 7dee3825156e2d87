use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use domain::{Saga, SagaStatus};
use tokio::sync::RwLock;

use crate::{Result, SagaRepository, StoreError};

/// In-memory saga repository for testing.
///
/// Enforces the same versioning and business-key rules as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaRepository {
    sagas: Arc<RwLock<HashMap<SagaId, Saga>>>,
}

impl InMemorySagaRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Removes all sagas.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }

    async fn filtered(&self, predicate: impl Fn(&Saga) -> bool) -> Vec<Saga> {
        let store = self.sagas.read().await;
        let mut sagas: Vec<Saga> = store.values().filter(|&s| predicate(s)).cloned().collect();
        sagas.sort_by_key(|s| s.started_at());
        sagas
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn save(&self, saga: &Saga) -> Result<Version> {
        let mut store = self.sagas.write().await;
        let current = store.get(&saga.id()).map(|s| s.version());

        if saga.version() == Version::initial() {
            if let Some(actual) = current {
                return Err(StoreError::ConcurrencyConflict {
                    saga_id: saga.id(),
                    expected: Version::initial(),
                    actual,
                });
            }
            if store
                .values()
                .any(|s| s.business_key() == saga.business_key())
            {
                return Err(StoreError::DuplicateBusinessKey(
                    saga.business_key().to_string(),
                ));
            }
        } else {
            match current {
                None => return Err(StoreError::SagaNotFound(saga.id())),
                Some(actual) if actual != saga.version() => {
                    return Err(StoreError::ConcurrencyConflict {
                        saga_id: saga.id(),
                        expected: saga.version(),
                        actual,
                    });
                }
                Some(_) => {}
            }
        }

        let next = saga.version().next();
        let mut stored = saga.clone();
        stored.set_version(next);
        store.insert(saga.id(), stored);
        Ok(next)
    }

    async fn find_by_id(&self, id: SagaId) -> Result<Option<Saga>> {
        Ok(self.sagas.read().await.get(&id).cloned())
    }

    async fn find_by_business_key(&self, business_key: &str) -> Result<Option<Saga>> {
        let store = self.sagas.read().await;
        Ok(store
            .values()
            .find(|s| s.business_key() == business_key)
            .cloned())
    }

    async fn exists_by_business_key(&self, business_key: &str) -> Result<bool> {
        let store = self.sagas.read().await;
        Ok(store.values().any(|s| s.business_key() == business_key))
    }

    async fn find_active_sagas(&self) -> Result<Vec<Saga>> {
        Ok(self.filtered(|s| !s.is_terminal()).await)
    }

    async fn find_sagas_needing_compensation(&self) -> Result<Vec<Saga>> {
        Ok(self.filtered(|s| s.needs_compensation()).await)
    }

    async fn find_stuck_sagas(&self, before: DateTime<Utc>) -> Result<Vec<Saga>> {
        Ok(self.filtered(|s| s.is_stuck(before)).await)
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        Ok(self
            .filtered(|s| s.correlation_id() == Some(correlation_id))
            .await)
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>> {
        Ok(self.filtered(|s| s.status() == status).await)
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64> {
        let store = self.sagas.read().await;
        Ok(store.values().filter(|s| s.status() == status).count() as u64)
    }
}
