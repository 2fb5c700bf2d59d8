//! Workflow update handles
//!
//! An update runs in three phases on the worker (validate, accept,
//! complete). Client-side, `start_update` blocks until the accepted stage
//! and `result` long-polls the completed stage. Deadline-exceeded statuses
//! are retried transparently; every other error surfaces unchanged.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use tempo_core::common::WorkflowExecution;
use tempo_core::error::RpcErrorKind;
use tempo_core::payload::Headers;
use tempo_core::service::{
    PollWorkflowExecutionUpdateRequest, UpdateLifecycleStage, UpdateOutcome, UpdateRef,
    UpdateWorkflowExecutionRequest,
};

use crate::error::ClientError;
use crate::workflow_handle::WorkflowHandle;
use crate::Client;

/// Handle to an in-flight (or completed) update
pub struct WorkflowUpdateHandle {
    client: Client,
    update_id: String,
    execution: WorkflowExecution,
    /// Outcome captured at start time, when the server returned one early
    known_outcome: Option<UpdateOutcome>,
}

impl WorkflowUpdateHandle {
    pub fn update_id(&self) -> &str {
        &self.update_id
    }

    /// Long-poll until the update completes and decode its outcome
    pub async fn result<O: DeserializeOwned>(mut self) -> Result<O, ClientError> {
        if let Some(outcome) = self.known_outcome.take() {
            return self.decode_outcome(outcome);
        }

        loop {
            let response = self
                .client
                .inner
                .outbound
                .poll_workflow_update(PollWorkflowExecutionUpdateRequest {
                    namespace: self.client.inner.namespace.clone(),
                    update_ref: UpdateRef {
                        workflow_execution: self.execution.clone(),
                        update_id: self.update_id.clone(),
                    },
                    identity: self.client.inner.identity.clone(),
                    wait_for_stage: UpdateLifecycleStage::Completed,
                })
                .await;

            match response {
                Ok(response) => {
                    if let Some(outcome) = response.outcome {
                        return self.decode_outcome(outcome);
                    }
                    debug!(update_id = %self.update_id, stage = ?response.stage,
                        "update not complete yet, polling again");
                }
                Err(ClientError::Rpc(e)) if e.kind == RpcErrorKind::DeadlineExceeded => {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn decode_outcome<O: DeserializeOwned>(
        &self,
        outcome: UpdateOutcome,
    ) -> Result<O, ClientError> {
        match outcome {
            UpdateOutcome::Success { result } => Ok(self
                .client
                .inner
                .converter
                .from_optional_payload(result.as_ref())?),
            UpdateOutcome::Failure { failure } => {
                let cause = self.client.inner.converter.failure_from_wire(failure)?;
                Err(ClientError::UpdateFailed { cause })
            }
        }
    }
}

impl WorkflowHandle {
    /// Propose an update and wait until it is accepted (or rejected)
    pub async fn start_update<I: Serialize>(
        &self,
        update_name: impl Into<String>,
        input: &I,
    ) -> Result<WorkflowUpdateHandle, ClientError> {
        let client = self.client().clone();
        let update_name = update_name.into();
        let update_id = Uuid::now_v7().to_string();
        let payload = client.inner.converter.to_payload(input)?;

        let execution = WorkflowExecution {
            workflow_id: self.workflow_id().to_string(),
            run_id: self.run_id().unwrap_or_default().to_string(),
        };

        loop {
            let response = client
                .inner
                .outbound
                .update_workflow(UpdateWorkflowExecutionRequest {
                    namespace: client.inner.namespace.clone(),
                    workflow_execution: execution.clone(),
                    update_id: update_id.clone(),
                    update_name: update_name.clone(),
                    input: vec![payload.clone()],
                    header: Headers::default(),
                    identity: client.inner.identity.clone(),
                    wait_for_stage: UpdateLifecycleStage::Accepted,
                    first_execution_run_id: None,
                })
                .await;

            match response {
                Ok(response) => {
                    // A rejected update surfaces its failure outcome here
                    if let Some(UpdateOutcome::Failure { failure }) = &response.outcome {
                        if response.stage < UpdateLifecycleStage::Accepted {
                            let cause =
                                client.inner.converter.failure_from_wire(failure.clone())?;
                            return Err(ClientError::UpdateFailed { cause });
                        }
                    }
                    return Ok(WorkflowUpdateHandle {
                        client,
                        update_id: response.update_ref.update_id,
                        execution: response.update_ref.workflow_execution,
                        known_outcome: response.outcome,
                    });
                }
                Err(ClientError::Rpc(e)) if e.kind == RpcErrorKind::DeadlineExceeded => {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Propose an update and wait for its completed result
    pub async fn execute_update<I: Serialize, O: DeserializeOwned>(
        &self,
        update_name: impl Into<String>,
        input: &I,
    ) -> Result<O, ClientError> {
        let handle = self.start_update(update_name, input).await?;
        handle.result().await
    }
}
