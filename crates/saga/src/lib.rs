//! Saga orchestration engine.
//!
//! Coordinates multi-step financial operations across the transaction and
//! account services:
//! - [`SagaDomainService`] applies every state transition as one optimistic
//!   load → mutate → save unit
//! - [`SagaDomainService::compensate_saga`] undoes completed steps in reverse
//!   sequence order
//! - [`SagaCoordinator`] builds sagas from [`SagaDefinitions`], dispatches
//!   steps through a [`WorkflowGateway`] and routes callbacks back
//!
//! Remote calls never surface as errors; they come back as
//! [`RemoteResponse`] values and turn into step failures.

pub mod clients;
pub mod compensation;
pub mod config;
pub mod coordinator;
pub mod definitions;
pub mod error;
pub mod gateway;
pub mod service;
pub mod worker;

pub use clients::{RemoteResponse, ServiceEndpoints};
pub use compensation::CompensationOutcome;
pub use config::OrchestrationConfig;
pub use coordinator::{SagaCoordinator, StartSagaRequest};
pub use definitions::{SagaDefinition, SagaDefinitions, StepTemplate};
pub use error::{Result, SagaError};
pub use gateway::{
    GatewayError, InProcessWorkflowGateway, StepCallback, StepExecutor, StepHandle,
    WorkflowGateway,
};
pub use service::{SagaDomainService, SagaHealth};
pub use worker::CallbackWorker;
