//! Saga persistence.
//!
//! Provides the [`SagaRepository`] trait with an in-memory implementation for
//! tests and a PostgreSQL implementation for production.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::InMemorySagaRepository;
pub use postgres::PostgresSagaRepository;
pub use repository::{SagaRepository, SagaRepositoryExt};
