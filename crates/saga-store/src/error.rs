use common::{SagaId, Version};
use thiserror::Error;

/// Errors that can occur when interacting with the saga repository.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The saga was modified by someone else since it was loaded.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// Another saga already uses this business key.
    #[error("Saga with business key '{0}' already exists")]
    DuplicateBusinessKey(String),

    /// The saga was not found in the repository.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if retrying the operation on fresh state may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for saga repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;
