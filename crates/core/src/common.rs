//! Common identifiers, policies, and per-task info records

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::retry::RetryPolicy;

/// Identifies a workflow run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowExecution {
    /// User-assigned workflow id
    pub workflow_id: String,

    /// Run id; empty selects the latest run
    #[serde(default)]
    pub run_id: String,
}

impl WorkflowExecution {
    /// Create an execution reference
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Policy applied when starting a workflow whose id was used by a closed run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowIdReusePolicy {
    /// Any closed run may be superseded
    #[default]
    AllowDuplicate,

    /// Only failed (non-completed) runs may be superseded
    AllowDuplicateFailedOnly,

    /// Reject if the id was ever used
    RejectDuplicate,

    /// Deprecated: terminate a running workflow with the same id.
    /// Accepted on the wire; prefer [`WorkflowIdConflictPolicy::TerminateExisting`].
    TerminateIfRunning,
}

/// Policy applied when starting a workflow whose id has a currently open run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowIdConflictPolicy {
    /// Server default (fail)
    #[default]
    Unspecified,

    /// Fail the start with an already-started error
    Fail,

    /// Return a handle to the open run instead of starting
    UseExisting,

    /// Terminate the open run, then start
    TerminateExisting,
}

/// Terminal and non-terminal execution states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

impl WorkflowExecutionStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Task queue kind as echoed by the cluster
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskQueueKind {
    #[default]
    Normal,
    Sticky,
}

/// Reference to a parent workflow execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentInfo {
    /// Namespace the parent runs in
    pub namespace: String,

    /// Parent execution
    pub execution: WorkflowExecution,
}

/// Read-only information about the current workflow run
///
/// Available to workflow code through the workflow context. All fields are
/// reconstructed identically on replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowInfo {
    /// User-assigned workflow id
    pub workflow_id: String,

    /// Current run id
    pub run_id: String,

    /// Registered workflow type name
    pub workflow_type: String,

    /// Task queue this run is processed on
    pub task_queue: String,

    /// Namespace the run lives in
    pub namespace: String,

    /// Attempt number, 1-based
    pub attempt: u32,

    /// Time the first workflow task was scheduled
    pub start_time: DateTime<Utc>,

    /// Maximum duration of a single run
    #[serde(default, with = "opt_duration_ms")]
    pub run_timeout: Option<Duration>,

    /// Maximum duration of a single workflow task
    #[serde(default, with = "opt_duration_ms")]
    pub task_timeout: Option<Duration>,

    /// Maximum duration of the whole execution chain
    #[serde(default, with = "opt_duration_ms")]
    pub execution_timeout: Option<Duration>,

    /// Retry policy for the execution, if any
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,

    /// Parent execution, for child workflows
    #[serde(default)]
    pub parent: Option<ParentInfo>,

    /// Run id this run continued from, if any
    #[serde(default)]
    pub continued_run_id: Option<String>,

    /// Cron expression, when cron-scheduled
    #[serde(default)]
    pub cron_schedule: Option<String>,

    /// Failure that caused the last run or task retry, if any
    #[serde(default)]
    pub last_failure: Option<crate::failure::TemporalFailure>,
}

/// Read-only information about the current activity task
///
/// Created when an activity start task arrives and owned exclusively by the
/// running task until completion is reported.
#[derive(Debug, Clone)]
pub struct ActivityInfo {
    /// Activity id within the workflow
    pub activity_id: String,

    /// Registered activity type name
    pub activity_type: String,

    /// Attempt number, 1-based
    pub attempt: u32,

    /// Time the activity was first scheduled
    pub scheduled_time: DateTime<Utc>,

    /// Time this attempt started
    pub started_time: DateTime<Utc>,

    /// Time the current attempt was scheduled
    pub current_attempt_scheduled_time: DateTime<Utc>,

    /// Heartbeat timeout, if configured
    pub heartbeat_timeout: Option<Duration>,

    /// Schedule-to-close timeout, if configured
    pub schedule_to_close_timeout: Option<Duration>,

    /// Start-to-close timeout, if configured
    pub start_to_close_timeout: Option<Duration>,

    /// Whether this is a local activity
    pub is_local: bool,

    /// Task queue the activity was dispatched on
    pub task_queue: String,

    /// Opaque completion token
    pub task_token: Vec<u8>,

    /// Owning workflow id
    pub workflow_id: String,

    /// Owning workflow run id
    pub workflow_run_id: String,

    /// Owning workflow type
    pub workflow_type: String,

    /// Owning workflow namespace
    pub workflow_namespace: String,

    /// Details recorded by the last heartbeat of a prior attempt
    pub heartbeat_details: Vec<Payload>,
}

/// Snapshot of an execution as returned by describe/list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecutionInfo {
    /// The execution
    pub execution: WorkflowExecution,

    /// Workflow type name
    pub workflow_type: String,

    /// Start time
    pub start_time: DateTime<Utc>,

    /// Close time, for closed executions
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,

    /// Current status
    pub status: WorkflowExecutionStatus,

    /// Task queue
    pub task_queue: String,

    /// Parent execution, for child workflows
    #[serde(default)]
    pub parent: Option<ParentInfo>,

    /// Memo fields
    #[serde(default)]
    pub memo: HashMap<String, Payload>,

    /// Search attributes as stored
    #[serde(default)]
    pub search_attributes: HashMap<String, Payload>,

    /// Number of history events
    #[serde(default)]
    pub history_length: i64,
}

/// Serde support for Duration (as milliseconds)
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> (as milliseconds)
pub mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
