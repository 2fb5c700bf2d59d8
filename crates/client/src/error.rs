//! Client-side error taxonomy

use tempo_core::common::WorkflowExecutionStatus;
use tempo_core::error::{ArgumentError, RpcError};
use tempo_core::failure::TemporalFailure;
use tempo_convert::DataConverterError;

/// Errors surfaced by client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Start rejected because an open run exists under the fail policy
    #[error("workflow '{workflow_id}' of type '{workflow_type}' already started (run {run_id})")]
    WorkflowAlreadyStarted {
        workflow_id: String,
        workflow_type: String,
        run_id: String,
    },

    /// The worker rejected the query (maps an invalid-argument status)
    #[error("workflow query failed: {0}")]
    QueryFailed(String),

    /// The query matched the requested rejection condition
    #[error("workflow query rejected, execution status {status:?}")]
    QueryRejected { status: WorkflowExecutionStatus },

    /// The update completed with a failure outcome
    #[error("workflow update failed: {}", cause.message)]
    UpdateFailed { cause: TemporalFailure },

    /// The workflow run closed as failed
    #[error("workflow failed: {}", failure.message)]
    WorkflowFailed { failure: TemporalFailure },

    /// The workflow run closed as cancelled
    #[error("workflow cancelled")]
    WorkflowCancelled { failure: TemporalFailure },

    /// The workflow run was forcefully terminated
    #[error("workflow terminated: {reason}")]
    WorkflowTerminated { reason: String },

    /// The workflow run timed out
    #[error("workflow timed out")]
    WorkflowTimedOut,

    /// The run continued as new and following was disabled
    #[error("workflow continued as new (run {new_run_id})")]
    WorkflowContinuedAsNew { new_run_id: String },

    /// History contained an event the client cannot interpret here
    #[error("unknown workflow event: {0}")]
    UnknownWorkflowEvent(String),

    /// The cluster requested cancellation of an async activity
    #[error("async activity cancellation requested")]
    AsyncActivityCancelled,

    /// A caller-supplied argument was invalid
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// Payload conversion failed
    #[error(transparent)]
    DataConverter(#[from] DataConverterError),

    /// A transport-level error, surfaced unchanged
    #[error(transparent)]
    Rpc(#[from] RpcError),
}
