//! Gateway that runs steps on the local tokio runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Saga, SagaStep};
use tokio::sync::mpsc;

use super::executor::{StepExecutor, StepRequest};
use super::{GatewayError, StepCallback, StepHandle, WorkflowGateway};
use crate::clients::RemoteResponse;

/// Executes each dispatched step in its own task and publishes the outcome
/// on a channel.
///
/// The receiving half is usually driven by a
/// [`CallbackWorker`](crate::worker::CallbackWorker).
#[derive(Clone)]
pub struct InProcessWorkflowGateway {
    executor: Arc<StepExecutor>,
    callbacks: mpsc::Sender<StepCallback>,
}

impl InProcessWorkflowGateway {
    pub fn new(executor: StepExecutor, callbacks: mpsc::Sender<StepCallback>) -> Self {
        Self {
            executor: Arc::new(executor),
            callbacks,
        }
    }

    /// Creates a gateway together with the receiver its callbacks arrive on.
    pub fn with_channel(
        executor: StepExecutor,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<StepCallback>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self::new(executor, sender), receiver)
    }
}

#[async_trait]
impl WorkflowGateway for InProcessWorkflowGateway {
    async fn start_step_execution(
        &self,
        saga: &Saga,
        step: &SagaStep,
        context: &HashMap<String, String>,
    ) -> Result<StepHandle, GatewayError> {
        if self.callbacks.is_closed() {
            return Err(GatewayError::Closed);
        }

        let request = StepRequest::new(saga, step, context);
        let handle = StepHandle::new(format!("{}:{}", saga.id(), step.id()));
        let executor = Arc::clone(&self.executor);
        let callbacks = self.callbacks.clone();

        tracing::debug!(saga_id = %saga.id(), step = step.name(), %handle, "dispatching step");
        tokio::spawn(async move {
            let callback = executor.execute(request).await;
            if callbacks.send(callback).await.is_err() {
                tracing::warn!("callback channel closed before step outcome was delivered");
            }
        });

        Ok(handle)
    }

    async fn compensate_step(&self, saga: &Saga, step: &SagaStep) -> RemoteResponse<()> {
        self.executor.compensate(saga, step).await
    }
}
