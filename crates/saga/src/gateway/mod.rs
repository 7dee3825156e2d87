//! Workflow gateway: the boundary between the orchestrator and whatever
//! physically executes saga steps.
//!
//! The orchestrator asks the gateway to start a step and later receives a
//! [`StepCallback`]. Compensation actions are invoked synchronously and
//! answer with a [`RemoteResponse`].

pub mod executor;
pub mod in_process;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use common::{SagaId, StepId};
use domain::{Saga, SagaStep};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clients::RemoteResponse;

pub use executor::{DebitCompensation, StepExecutor, context_keys};
pub use in_process::InProcessWorkflowGateway;

/// Opaque identifier of a dispatched step execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepHandle(String);

impl StepHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a step execution, reported back by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepCallback {
    Completed {
        saga_id: SagaId,
        step_id: StepId,
        output: Option<String>,
        compensation_data: Option<String>,
    },
    Failed {
        saga_id: SagaId,
        step_id: StepId,
        error: String,
    },
}

impl StepCallback {
    pub fn saga_id(&self) -> SagaId {
        match self {
            StepCallback::Completed { saga_id, .. } | StepCallback::Failed { saga_id, .. } => {
                *saga_id
            }
        }
    }

    pub fn step_id(&self) -> StepId {
        match self {
            StepCallback::Completed { step_id, .. } | StepCallback::Failed { step_id, .. } => {
                *step_id
            }
        }
    }
}

/// Errors raised while handing a step to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The callback channel is gone, so no outcome could ever be reported.
    #[error("Workflow gateway is shut down")]
    Closed,

    /// The step names a service the gateway cannot reach.
    #[error("No executor for service '{0}'")]
    UnsupportedService(String),
}

/// Starts step executions and runs compensation actions.
#[async_trait]
pub trait WorkflowGateway: Send + Sync {
    /// Dispatches `step` for execution. The outcome arrives later as a
    /// [`StepCallback`].
    async fn start_step_execution(
        &self,
        saga: &Saga,
        step: &SagaStep,
        context: &HashMap<String, String>,
    ) -> Result<StepHandle, GatewayError>;

    /// Runs the step's compensation action using its captured compensation data.
    async fn compensate_step(&self, saga: &Saga, step: &SagaStep) -> RemoteResponse<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_accessors() {
        let saga_id = SagaId::new();
        let step_id = StepId::new();
        let callback = StepCallback::Failed {
            saga_id,
            step_id,
            error: "boom".into(),
        };
        assert_eq!(callback.saga_id(), saga_id);
        assert_eq!(callback.step_id(), step_id);
    }

    #[test]
    fn test_callback_serialization_is_tagged() {
        let callback = StepCallback::Completed {
            saga_id: SagaId::new(),
            step_id: StepId::new(),
            output: Some("TX-0001".into()),
            compensation_data: None,
        };
        let json = serde_json::to_value(&callback).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["output"], "TX-0001");
    }
}
