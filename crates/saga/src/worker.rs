//! Pumps step callbacks from the gateway channel into the coordinator.

use std::sync::Arc;

use domain::Saga;
use saga_store::SagaRepository;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::SagaCoordinator;
use crate::error::Result;
use crate::gateway::{StepCallback, WorkflowGateway};

pub struct CallbackWorker<R, G> {
    coordinator: Arc<SagaCoordinator<R, G>>,
    callbacks: mpsc::Receiver<StepCallback>,
}

impl<R, G> CallbackWorker<R, G>
where
    R: SagaRepository + 'static,
    G: WorkflowGateway + 'static,
{
    pub fn new(
        coordinator: Arc<SagaCoordinator<R, G>>,
        callbacks: mpsc::Receiver<StepCallback>,
    ) -> Self {
        Self {
            coordinator,
            callbacks,
        }
    }

    /// Handles the next callback. Returns `None` once every sender is gone.
    pub async fn process_one(&mut self) -> Option<Result<Saga>> {
        let callback = self.callbacks.recv().await?;
        Some(self.coordinator.handle_callback(callback).await)
    }

    /// Handles callbacks until the channel closes. Failures are logged and do
    /// not stop the loop.
    pub async fn run(mut self) {
        while let Some(result) = self.process_one().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to apply step callback");
            }
        }
        tracing::info!("callback worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
