//! Async activity completion
//!
//! An activity that raised the async-completion sentinel stays owned by the
//! cluster until one of these calls resolves it. Operations dispatch on the
//! reference variant: task tokens use the token RPCs, id triples use the
//! `*ById` RPCs.

use serde::Serialize;

use tempo_core::failure::TemporalFailure;
use tempo_core::payload::Payload;
use tempo_core::service::{
    RecordActivityTaskHeartbeatByIdRequest, RecordActivityTaskHeartbeatRequest,
    RespondActivityTaskCanceledByIdRequest, RespondActivityTaskCanceledRequest,
    RespondActivityTaskCompletedByIdRequest, RespondActivityTaskCompletedRequest,
    RespondActivityTaskFailedByIdRequest, RespondActivityTaskFailedRequest,
};

use crate::error::ClientError;
use crate::Client;

/// How the activity is addressed
#[derive(Debug, Clone)]
pub enum AsyncActivityRef {
    /// The opaque completion token captured inside the activity
    TaskToken(Vec<u8>),

    /// Workflow id, optional run id, and activity id
    Id {
        workflow_id: String,
        run_id: Option<String>,
        activity_id: String,
    },
}

/// Handle completing an activity owned by the cluster
#[derive(Clone)]
pub struct AsyncActivityHandle {
    client: Client,
    reference: AsyncActivityRef,
}

impl Client {
    /// A handle for async-activity completion
    pub fn async_activity_handle(&self, reference: AsyncActivityRef) -> AsyncActivityHandle {
        AsyncActivityHandle {
            client: self.clone(),
            reference,
        }
    }
}

impl AsyncActivityHandle {
    /// Record a heartbeat; raises the cancelled error when the response
    /// carries a cancellation request
    pub async fn heartbeat<T: Serialize>(
        &self,
        details: Option<&T>,
    ) -> Result<(), ClientError> {
        let details = self.encode_details(details)?;
        let inner = &self.client.inner;

        let response = match &self.reference {
            AsyncActivityRef::TaskToken(task_token) => {
                inner
                    .service
                    .record_activity_task_heartbeat(RecordActivityTaskHeartbeatRequest {
                        namespace: inner.namespace.clone(),
                        task_token: task_token.clone(),
                        details,
                        identity: inner.identity.clone(),
                    })
                    .await?
            }
            AsyncActivityRef::Id {
                workflow_id,
                run_id,
                activity_id,
            } => {
                inner
                    .service
                    .record_activity_task_heartbeat_by_id(
                        RecordActivityTaskHeartbeatByIdRequest {
                            namespace: inner.namespace.clone(),
                            workflow_id: workflow_id.clone(),
                            run_id: run_id.clone().unwrap_or_default(),
                            activity_id: activity_id.clone(),
                            details,
                            identity: inner.identity.clone(),
                        },
                    )
                    .await?
            }
        };

        if response.cancel_requested {
            return Err(ClientError::AsyncActivityCancelled);
        }
        Ok(())
    }

    /// Complete the activity successfully
    pub async fn complete<T: Serialize>(&self, result: &T) -> Result<(), ClientError> {
        let result = Some(self.client.inner.converter.to_payload(result)?);
        let inner = &self.client.inner;

        match &self.reference {
            AsyncActivityRef::TaskToken(task_token) => {
                inner
                    .service
                    .respond_activity_task_completed(RespondActivityTaskCompletedRequest {
                        namespace: inner.namespace.clone(),
                        task_token: task_token.clone(),
                        result,
                        identity: inner.identity.clone(),
                    })
                    .await?
            }
            AsyncActivityRef::Id {
                workflow_id,
                run_id,
                activity_id,
            } => {
                inner
                    .service
                    .respond_activity_task_completed_by_id(
                        RespondActivityTaskCompletedByIdRequest {
                            namespace: inner.namespace.clone(),
                            workflow_id: workflow_id.clone(),
                            run_id: run_id.clone().unwrap_or_default(),
                            activity_id: activity_id.clone(),
                            result,
                            identity: inner.identity.clone(),
                        },
                    )
                    .await?
            }
        }
        Ok(())
    }

    /// Fail the activity with the given failure
    pub async fn fail(&self, failure: TemporalFailure) -> Result<(), ClientError> {
        let failure = self.client.inner.converter.failure_to_wire(failure)?;
        let inner = &self.client.inner;

        match &self.reference {
            AsyncActivityRef::TaskToken(task_token) => {
                inner
                    .service
                    .respond_activity_task_failed(RespondActivityTaskFailedRequest {
                        namespace: inner.namespace.clone(),
                        task_token: task_token.clone(),
                        failure,
                        last_heartbeat_details: vec![],
                        identity: inner.identity.clone(),
                    })
                    .await?
            }
            AsyncActivityRef::Id {
                workflow_id,
                run_id,
                activity_id,
            } => {
                inner
                    .service
                    .respond_activity_task_failed_by_id(RespondActivityTaskFailedByIdRequest {
                        namespace: inner.namespace.clone(),
                        workflow_id: workflow_id.clone(),
                        run_id: run_id.clone().unwrap_or_default(),
                        activity_id: activity_id.clone(),
                        failure,
                        identity: inner.identity.clone(),
                    })
                    .await?
            }
        }
        Ok(())
    }

    /// Report the activity as cancelled
    pub async fn report_cancellation<T: Serialize>(
        &self,
        details: Option<&T>,
    ) -> Result<(), ClientError> {
        let details = self.encode_details(details)?;
        let inner = &self.client.inner;

        match &self.reference {
            AsyncActivityRef::TaskToken(task_token) => {
                inner
                    .service
                    .respond_activity_task_canceled(RespondActivityTaskCanceledRequest {
                        namespace: inner.namespace.clone(),
                        task_token: task_token.clone(),
                        details,
                        identity: inner.identity.clone(),
                    })
                    .await?
            }
            AsyncActivityRef::Id {
                workflow_id,
                run_id,
                activity_id,
            } => {
                inner
                    .service
                    .respond_activity_task_canceled_by_id(
                        RespondActivityTaskCanceledByIdRequest {
                            namespace: inner.namespace.clone(),
                            workflow_id: workflow_id.clone(),
                            run_id: run_id.clone().unwrap_or_default(),
                            activity_id: activity_id.clone(),
                            details,
                            identity: inner.identity.clone(),
                        },
                    )
                    .await?
            }
        }
        Ok(())
    }

    fn encode_details<T: Serialize>(
        &self,
        details: Option<&T>,
    ) -> Result<Vec<Payload>, ClientError> {
        match details {
            Some(value) => Ok(vec![self.client.inner.converter.to_payload(value)?]),
            None => Ok(vec![]),
        }
    }
}
