//! Workflow replay engine
//!
//! Turns bridge-issued activations into deterministic user-code execution
//! and back into command batches. One run is activated at a time; the same
//! run is never activated concurrently.

mod context;
mod machines;
mod replayer;
mod run;

pub use context::{
    ActivityFuture, ActivityOptions, ChildWorkflowHandle, ChildWorkflowOptions, ConditionFuture,
    TimerFuture, WfContext, WorkflowState,
};
pub use replayer::{ReplayError, Replayer};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use tempo_core::bridge::{ActivationJob, BridgeError, CoreBridge, WorkflowActivation,
    WorkflowActivationCompletion};
use tempo_core::failure::TemporalFailure;
use tempo_core::history::WorkflowTaskFailedCause;
use tempo_convert::DataConverter;

use crate::error::WorkerError;
use crate::interceptors::WorkerInterceptor;
use crate::registry::Registry;

use run::WorkflowRun;

/// Polls workflow activations and drives per-run engines
pub(crate) struct WorkflowWorker {
    bridge: Arc<dyn CoreBridge>,
    registry: Arc<Registry>,
    converter: Arc<DataConverter>,
    providers: Arc<Vec<Arc<dyn WorkerInterceptor>>>,
    namespace: String,
    runs: Mutex<HashMap<String, WorkflowRun>>,
}

impl WorkflowWorker {
    pub(crate) fn new(
        bridge: Arc<dyn CoreBridge>,
        registry: Arc<Registry>,
        converter: Arc<DataConverter>,
        providers: Arc<Vec<Arc<dyn WorkerInterceptor>>>,
        namespace: String,
    ) -> Self {
        Self {
            bridge,
            registry,
            converter,
            providers,
            namespace,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Poll until the bridge reports shutdown
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub(crate) async fn run(&self) -> Result<(), WorkerError> {
        loop {
            let activation = match self.bridge.poll_workflow_activation().await {
                Ok(activation) => activation,
                Err(BridgeError::ShutDown) => {
                    info!("workflow poller draining complete");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let completion = self.handle_activation(activation);
            match self.bridge.complete_workflow_activation(completion).await {
                Ok(()) => {}
                Err(BridgeError::ShutDown) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply one activation; synchronous, and the only writer for the run
    fn handle_activation(&self, activation: WorkflowActivation) -> WorkflowActivationCompletion {
        let run_id = activation.run_id.clone();

        if activation.is_eviction() {
            debug!(%run_id, "evicting run from cache");
            self.runs.lock().remove(&run_id);
            return WorkflowActivationCompletion::success(run_id, vec![]);
        }

        let mut runs = self.runs.lock();

        if let Some(ActivationJob::InitializeWorkflow {
            workflow_id,
            attributes,
        }) = activation
            .jobs
            .iter()
            .find(|j| matches!(j, ActivationJob::InitializeWorkflow { .. }))
        {
            let Some(registration) = self.registry.workflow(&attributes.workflow_type) else {
                let message = format!(
                    "workflow type '{}' is not registered on this worker, known types: [{}]",
                    attributes.workflow_type,
                    self.registry.workflow_names().join(", ")
                );
                warn!(%run_id, "{message}");
                return WorkflowActivationCompletion::fail(
                    run_id,
                    WorkflowTaskFailedCause::Unspecified,
                    TemporalFailure::application(message, "NotFoundError").non_retryable(),
                );
            };

            match WorkflowRun::new(
                run_id.clone(),
                workflow_id.clone(),
                self.namespace.clone(),
                attributes.clone(),
                activation.timestamp,
                registration,
                &self.providers,
                self.converter.clone(),
            ) {
                Ok(run) => {
                    runs.insert(run_id.clone(), run);
                }
                Err(fault) => {
                    return WorkflowActivationCompletion::fail(
                        run_id,
                        fault.cause,
                        fault.failure,
                    );
                }
            }
        }

        let Some(run) = runs.get_mut(&run_id) else {
            // The run was evicted and the bridge must replay it from history
            return WorkflowActivationCompletion::fail(
                run_id,
                WorkflowTaskFailedCause::Unspecified,
                TemporalFailure::application(
                    "activation for run not in cache",
                    "NotFoundError",
                ),
            );
        };

        match run.activate(activation) {
            Ok(commands) => WorkflowActivationCompletion::success(run_id, commands),
            Err(fault) => {
                // Engine faults retry the workflow task on a fresh run state
                runs.remove(&run_id);
                WorkflowActivationCompletion::fail(run_id, fault.cause, fault.failure)
            }
        }
    }
}
