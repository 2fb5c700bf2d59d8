//! Workflow handles
//!
//! A handle addresses one workflow (optionally pinned to a run) and exposes
//! the operations a caller performs against it. `result` long-polls the
//! close event and follows continue-as-new chains by default.

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use tempo_core::common::{WorkflowExecution, WorkflowExecutionInfo};
use tempo_core::history::{EventAttributes, HistoryEvent};
use tempo_core::payload::Headers;
use tempo_core::service::{
    DescribeWorkflowExecutionRequest, GetWorkflowExecutionHistoryRequest,
    HistoryEventFilterType, QueryRejectCondition, QueryWorkflowRequest,
    RequestCancelWorkflowExecutionRequest, SignalWorkflowExecutionRequest,
    TerminateWorkflowExecutionRequest,
};

use crate::error::ClientError;
use crate::Client;

/// Handle to one workflow execution
#[derive(Clone)]
pub struct WorkflowHandle {
    client: Client,
    workflow_id: String,
    run_id: Option<String>,
    first_execution_run_id: Option<String>,
    follow_runs: bool,
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .field("run_id", &self.run_id)
            .field("first_execution_run_id", &self.first_execution_run_id)
            .field("follow_runs", &self.follow_runs)
            .finish()
    }
}

impl WorkflowHandle {
    pub(crate) fn new(
        client: Client,
        workflow_id: String,
        run_id: Option<String>,
        first_execution_run_id: Option<String>,
    ) -> Self {
        Self {
            client,
            workflow_id,
            run_id,
            first_execution_run_id,
            follow_runs: true,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The pinned run id, when the handle addresses a specific run
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Disable following continue-as-new chains in [`WorkflowHandle::result`]
    pub fn without_following_runs(mut self) -> Self {
        self.follow_runs = false;
        self
    }

    fn execution(&self) -> WorkflowExecution {
        WorkflowExecution {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone().unwrap_or_default(),
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Send a signal; durable once the call returns
    pub async fn signal<I: Serialize>(
        &self,
        signal_name: impl Into<String>,
        input: &I,
    ) -> Result<(), ClientError> {
        let payload = self.client.inner.converter.to_payload(input)?;
        self.client
            .inner
            .outbound
            .signal_workflow(SignalWorkflowExecutionRequest {
                namespace: self.client.inner.namespace.clone(),
                workflow_execution: self.execution(),
                signal_name: signal_name.into(),
                input: vec![payload],
                identity: self.client.inner.identity.clone(),
                request_id: Uuid::now_v7().to_string(),
                header: Headers::default(),
            })
            .await
    }

    /// Evaluate a query against the workflow's current state
    pub async fn query<I: Serialize, O: DeserializeOwned>(
        &self,
        query_type: impl Into<String>,
        input: &I,
        reject_condition: Option<QueryRejectCondition>,
    ) -> Result<O, ClientError> {
        let payload = self.client.inner.converter.to_payload(input)?;
        let response = self
            .client
            .inner
            .outbound
            .query_workflow(QueryWorkflowRequest {
                namespace: self.client.inner.namespace.clone(),
                execution: self.execution(),
                query_type: query_type.into(),
                query_args: vec![payload],
                header: Headers::default(),
                query_reject_condition: reject_condition,
            })
            .await?;

        if let Some(rejected) = response.query_rejected {
            return Err(ClientError::QueryRejected {
                status: rejected.status,
            });
        }
        Ok(self
            .client
            .inner
            .converter
            .from_optional_payload(response.query_result.as_ref())?)
    }

    /// Request cooperative cancellation
    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.client
            .inner
            .outbound
            .cancel_workflow(RequestCancelWorkflowExecutionRequest {
                namespace: self.client.inner.namespace.clone(),
                workflow_execution: self.execution(),
                identity: self.client.inner.identity.clone(),
                request_id: Uuid::now_v7().to_string(),
                first_execution_run_id: self.first_execution_run_id.clone(),
            })
            .await
    }

    /// Forcefully stop the workflow
    pub async fn terminate(
        &self,
        reason: impl Into<String>,
        details: Vec<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let mut payloads = Vec::with_capacity(details.len());
        for value in &details {
            payloads.push(self.client.inner.converter.to_payload(value)?);
        }
        self.client
            .inner
            .outbound
            .terminate_workflow(TerminateWorkflowExecutionRequest {
                namespace: self.client.inner.namespace.clone(),
                workflow_execution: self.execution(),
                reason: reason.into(),
                details: payloads,
                identity: self.client.inner.identity.clone(),
                first_execution_run_id: self.first_execution_run_id.clone(),
            })
            .await
    }

    /// A snapshot of the execution as the cluster sees it
    pub async fn describe(&self) -> Result<WorkflowExecutionInfo, ClientError> {
        let response = self
            .client
            .inner
            .outbound
            .describe_workflow(DescribeWorkflowExecutionRequest {
                namespace: self.client.inner.namespace.clone(),
                execution: self.execution(),
            })
            .await?;
        Ok(response.workflow_execution_info)
    }

    /// Fetch the full event history of the addressed run
    pub async fn fetch_history(&self) -> Result<Vec<HistoryEvent>, ClientError> {
        let mut events = Vec::new();
        let mut token = Vec::new();
        loop {
            let response = self
                .client
                .inner
                .service
                .get_workflow_execution_history(GetWorkflowExecutionHistoryRequest {
                    namespace: self.client.inner.namespace.clone(),
                    execution: self.execution(),
                    maximum_page_size: 1000,
                    next_page_token: token,
                    wait_new_event: false,
                    history_event_filter_type: HistoryEventFilterType::AllEvent,
                })
                .await?;
            events.extend(response.events);
            if response.next_page_token.is_empty() {
                return Ok(events);
            }
            token = response.next_page_token;
        }
    }

    /// Long-poll the close event and decode the result
    ///
    /// Follows continue-as-new chains unless disabled; each non-`Completed`
    /// terminal state surfaces as its typed error.
    pub async fn result<O: DeserializeOwned>(&self) -> Result<O, ClientError> {
        let mut execution = self.execution();
        loop {
            let close = self.poll_close_event(&execution).await?;
            match close.attributes {
                EventAttributes::WorkflowExecutionCompleted { result } => {
                    return Ok(self
                        .client
                        .inner
                        .converter
                        .from_optional_payload(result.as_ref())?);
                }
                EventAttributes::WorkflowExecutionFailed { failure } => {
                    let failure = self.client.inner.converter.failure_from_wire(failure)?;
                    return Err(ClientError::WorkflowFailed { failure });
                }
                EventAttributes::WorkflowExecutionCanceled { .. } => {
                    return Err(ClientError::WorkflowCancelled {
                        failure: tempo_core::failure::TemporalFailure::cancelled(
                            "workflow cancelled",
                        ),
                    });
                }
                EventAttributes::WorkflowExecutionTerminated { reason, .. } => {
                    return Err(ClientError::WorkflowTerminated { reason });
                }
                EventAttributes::WorkflowExecutionTimedOut {} => {
                    return Err(ClientError::WorkflowTimedOut);
                }
                EventAttributes::WorkflowExecutionContinuedAsNew {
                    new_execution_run_id,
                    ..
                } => {
                    if self.follow_runs {
                        execution.run_id = new_execution_run_id;
                        continue;
                    }
                    return Err(ClientError::WorkflowContinuedAsNew {
                        new_run_id: new_execution_run_id,
                    });
                }
                other => {
                    return Err(ClientError::UnknownWorkflowEvent(format!(
                        "unexpected close event: {other:?}"
                    )));
                }
            }
        }
    }

    async fn poll_close_event(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<HistoryEvent, ClientError> {
        let mut token = Vec::new();
        loop {
            let response = self
                .client
                .inner
                .service
                .get_workflow_execution_history(GetWorkflowExecutionHistoryRequest {
                    namespace: self.client.inner.namespace.clone(),
                    execution: execution.clone(),
                    maximum_page_size: 10,
                    next_page_token: token.clone(),
                    wait_new_event: true,
                    history_event_filter_type: HistoryEventFilterType::CloseEvent,
                })
                .await;

            let response = match response {
                Ok(r) => r,
                // A server-side long-poll deadline; retry transparently
                Err(e) if e.kind == tempo_core::error::RpcErrorKind::DeadlineExceeded => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(event) = response.events.into_iter().find(|e| e.is_close()) {
                return Ok(event);
            }
            token = response.next_page_token;
        }
    }
}
