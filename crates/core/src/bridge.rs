//! The narrow boundary to the Core runtime
//!
//! The bridge multiplexes the cluster connection and hands the worker
//! ready-to-run units: workflow activations (batches of jobs for one run)
//! and activity tasks. Completions flow back through the same boundary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::WorkflowCommand;
use crate::common::WorkflowExecution;
use crate::error::RpcError;
use crate::failure::TemporalFailure;
use crate::history::{StartChildFailedCause, WorkflowExecutionStartedAttributes,
    WorkflowTaskFailedCause};
use crate::payload::{Headers, Payload};
use crate::retry::RetryPolicy;

/// Errors crossing the bridge boundary
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The worker (or the bridge itself) is shutting down; pollers must exit
    #[error("worker is shutting down")]
    ShutDown,

    /// The underlying transport failed
    #[error("transport error: {0}")]
    Transport(#[from] RpcError),
}

/// How an activity resolved, as reported to the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityResolution {
    Completed {
        #[serde(default)]
        result: Option<Payload>,
    },
    Failed {
        failure: TemporalFailure,
    },
    Cancelled {
        failure: TemporalFailure,
    },
}

/// How a child workflow start resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartChildResolution {
    Succeeded {
        run_id: String,
    },
    Failed {
        workflow_id: String,
        workflow_type: String,
        cause: StartChildFailedCause,
    },
    /// The start was cancelled before the child came into existence
    Cancelled {
        failure: TemporalFailure,
    },
}

/// How a child workflow resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildWorkflowResolution {
    Completed {
        #[serde(default)]
        result: Option<Payload>,
    },
    Failed {
        failure: TemporalFailure,
    },
    Cancelled {
        failure: TemporalFailure,
    },
}

/// One job within an activation, delivered in history order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationJob {
    /// First job of the first activation of a run
    InitializeWorkflow {
        workflow_id: String,
        attributes: WorkflowExecutionStartedAttributes,
    },

    /// A timer started with `seq` fired
    FireTimer { seq: u32 },

    /// An activity scheduled with `seq` resolved
    ResolveActivity {
        seq: u32,
        resolution: ActivityResolution,
    },

    /// A child workflow start initiated with `seq` resolved
    ResolveChildWorkflowStart {
        seq: u32,
        resolution: StartChildResolution,
    },

    /// A child workflow initiated with `seq` reached a terminal state
    ResolveChildWorkflow {
        seq: u32,
        resolution: ChildWorkflowResolution,
    },

    /// An external-workflow signal initiated with `seq` resolved;
    /// `failure` is set when the target workflow was not found
    ResolveSignalExternalWorkflow {
        seq: u32,
        #[serde(default)]
        failure: Option<TemporalFailure>,
    },

    /// An external signal arrived
    SignalWorkflow {
        signal_name: String,
        #[serde(default)]
        input: Vec<Payload>,
        #[serde(default)]
        headers: Headers,
    },

    /// A query to answer without advancing history
    QueryWorkflow {
        query_id: String,
        query_type: String,
        #[serde(default)]
        arguments: Vec<Payload>,
        #[serde(default)]
        headers: Headers,
    },

    /// An update to validate, accept/reject, and run
    DoUpdate {
        id: String,
        name: String,
        #[serde(default)]
        input: Vec<Payload>,
        #[serde(default)]
        headers: Headers,
        /// False when replaying an already-accepted update
        run_validator: bool,
    },

    /// Cooperative cancellation of the whole run
    CancelWorkflow {
        #[serde(default)]
        details: Vec<Payload>,
    },

    /// Reseed the deterministic RNG (delivered on reset)
    UpdateRandomSeed { seed: u64 },

    /// Evict the run from the worker cache; no commands may be emitted
    RemoveFromCache { reason: String },
}

/// A batch of jobs for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowActivation {
    /// Run the jobs belong to
    pub run_id: String,

    /// The deterministic "now" for this activation
    pub timestamp: DateTime<Utc>,

    /// True while the run is replaying a known history prefix
    pub is_replaying: bool,

    /// Length of history processed so far
    pub history_length: i64,

    /// Jobs in history order
    pub jobs: Vec<ActivationJob>,
}

impl WorkflowActivation {
    /// Whether this activation only carries queries
    pub fn is_query_only(&self) -> bool {
        !self.jobs.is_empty()
            && self
                .jobs
                .iter()
                .all(|j| matches!(j, ActivationJob::QueryWorkflow { .. }))
    }

    /// Whether this activation evicts the run
    pub fn is_eviction(&self) -> bool {
        self.jobs
            .iter()
            .any(|j| matches!(j, ActivationJob::RemoveFromCache { .. }))
    }
}

/// Completion of a workflow activation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowActivationCompletion {
    pub run_id: String,
    pub status: ActivationStatus,
}

impl WorkflowActivationCompletion {
    /// Successful completion carrying the command batch
    pub fn success(run_id: impl Into<String>, commands: Vec<WorkflowCommand>) -> Self {
        Self {
            run_id: run_id.into(),
            status: ActivationStatus::Completed { commands },
        }
    }

    /// Failed completion; the cluster will retry the workflow task
    pub fn fail(
        run_id: impl Into<String>,
        cause: WorkflowTaskFailedCause,
        failure: TemporalFailure,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            status: ActivationStatus::Failed { cause, failure },
        }
    }
}

/// Outcome of an activation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationStatus {
    Completed { commands: Vec<WorkflowCommand> },
    Failed {
        cause: WorkflowTaskFailedCause,
        failure: TemporalFailure,
    },
}

/// Server-side reason attached to an activity cancel task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCancelReason {
    /// The activity no longer exists on the server
    NotFound,

    /// Cancellation was explicitly requested
    Cancelled,

    /// A timeout elapsed server-side
    TimedOut,

    /// The worker is shutting down
    WorkerShutdown,
}

/// Attributes of an activity start task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityStart {
    pub activity_id: String,
    pub activity_type: String,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: String,
    pub workflow_namespace: String,
    pub task_queue: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub heartbeat_details: Vec<Payload>,
    pub scheduled_time: DateTime<Utc>,
    pub current_attempt_scheduled_time: DateTime<Utc>,
    pub started_time: DateTime<Utc>,
    pub attempt: u32,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub schedule_to_close_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub start_to_close_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub heartbeat_timeout: Option<Duration>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub is_local: bool,
}

/// A task handed to the activity worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityTask {
    /// Opaque completion token; keys the running-activity table
    pub task_token: Vec<u8>,

    /// What to do
    pub variant: ActivityTaskVariant,
}

/// Start or cancel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityTaskVariant {
    Start(ActivityStart),
    Cancel { reason: ActivityCancelReason },
}

/// How an activity execution finished, reported through the bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityExecutionResult {
    Completed {
        #[serde(default)]
        result: Option<Payload>,
    },
    Failed {
        failure: TemporalFailure,
    },
    Cancelled {
        failure: TemporalFailure,
    },
    /// The activity will be completed later through the async-activity API
    WillCompleteAsync,
}

/// Completion of an activity task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityTaskCompletion {
    pub task_token: Vec<u8>,
    pub result: ActivityExecutionResult,
}

/// A heartbeat record for a running activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityHeartbeat {
    pub task_token: Vec<u8>,
    #[serde(default)]
    pub details: Vec<Payload>,
}

/// The Core runtime boundary
///
/// Implementations multiplex gRPC, namespace registration, poll channels,
/// and completion reporting. Heartbeat throttling against the activity's
/// heartbeat timeout happens on this side of the boundary.
#[async_trait]
pub trait CoreBridge: Send + Sync {
    /// Long-poll the next workflow activation. Returns
    /// [`BridgeError::ShutDown`] once draining finishes after shutdown.
    async fn poll_workflow_activation(&self) -> Result<WorkflowActivation, BridgeError>;

    /// Report the outcome of an activation, emitting its command batch
    /// atomically.
    async fn complete_workflow_activation(
        &self,
        completion: WorkflowActivationCompletion,
    ) -> Result<(), BridgeError>;

    /// Long-poll the next activity task
    async fn poll_activity_task(&self) -> Result<ActivityTask, BridgeError>;

    /// Report the outcome of an activity task
    async fn complete_activity_task(
        &self,
        completion: ActivityTaskCompletion,
    ) -> Result<(), BridgeError>;

    /// Record a heartbeat; throttled bridge-side
    async fn record_activity_heartbeat(
        &self,
        heartbeat: ActivityHeartbeat,
    ) -> Result<(), BridgeError>;

    /// Begin shutdown: outstanding polls resolve with
    /// [`BridgeError::ShutDown`] once buffered work is drained.
    async fn initiate_shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_only_activation() {
        let activation = WorkflowActivation {
            run_id: "r".to_string(),
            timestamp: Utc::now(),
            is_replaying: true,
            history_length: 3,
            jobs: vec![ActivationJob::QueryWorkflow {
                query_id: "q1".to_string(),
                query_type: "GetStatus".to_string(),
                arguments: vec![],
                headers: Headers::default(),
            }],
        };
        assert!(activation.is_query_only());
        assert!(!activation.is_eviction());
    }

    #[test]
    fn test_mixed_activation_not_query_only() {
        let activation = WorkflowActivation {
            run_id: "r".to_string(),
            timestamp: Utc::now(),
            is_replaying: false,
            history_length: 3,
            jobs: vec![
                ActivationJob::FireTimer { seq: 1 },
                ActivationJob::QueryWorkflow {
                    query_id: "q1".to_string(),
                    query_type: "GetStatus".to_string(),
                    arguments: vec![],
                    headers: Headers::default(),
                },
            ],
        };
        assert!(!activation.is_query_only());
    }
}
