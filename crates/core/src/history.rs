//! History event model
//!
//! The cluster's event log for one run, as consumed by the history replayer
//! and by close-event polling on the client. Command events carry the engine
//! sequence number that produced them so replay can match re-issued commands
//! against the recorded prefix.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::UpdateResponseOutcome;
use crate::common::{ParentInfo, WorkflowExecution};
use crate::failure::TemporalFailure;
use crate::payload::{Headers, Memo, Payload};
use crate::retry::RetryPolicy;

/// Why a workflow task was failed back to the cluster
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTaskFailedCause {
    #[default]
    Unspecified,

    /// Replay produced a command sequence diverging from history
    NonDeterministicError,

    /// User code raised an error the engine could not attribute to the run
    WorkflowWorkerUnhandledFailure,

    /// A query handler attempted to mutate workflow state
    QueryInsideMutation,
}

/// Why a child workflow start was rejected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartChildFailedCause {
    WorkflowAlreadyExists,
    NamespaceNotFound,
}

/// One history event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEvent {
    /// Monotonic event id assigned by the cluster, 1-based
    pub event_id: i64,

    /// Server-side event time
    pub event_time: DateTime<Utc>,

    /// Typed attributes
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    /// Whether this event closes the workflow execution
    pub fn is_close(&self) -> bool {
        matches!(
            self.attributes,
            EventAttributes::WorkflowExecutionCompleted { .. }
                | EventAttributes::WorkflowExecutionFailed { .. }
                | EventAttributes::WorkflowExecutionCanceled { .. }
                | EventAttributes::WorkflowExecutionTerminated { .. }
                | EventAttributes::WorkflowExecutionTimedOut { .. }
                | EventAttributes::WorkflowExecutionContinuedAsNew { .. }
        )
    }

    /// The engine sequence number for command events, `None` otherwise
    pub fn command_seq(&self) -> Option<u32> {
        match &self.attributes {
            EventAttributes::TimerStarted { seq, .. }
            | EventAttributes::TimerCanceled { seq }
            | EventAttributes::ActivityTaskScheduled { seq, .. }
            | EventAttributes::ActivityTaskCancelRequested { seq }
            | EventAttributes::StartChildWorkflowExecutionInitiated { seq, .. }
            | EventAttributes::SignalExternalWorkflowExecutionInitiated { seq, .. }
            | EventAttributes::RequestCancelExternalWorkflowExecutionInitiated { seq, .. } => {
                Some(*seq)
            }
            _ => None,
        }
    }
}

/// Attributes of the workflow-execution-started event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecutionStartedAttributes {
    pub workflow_type: String,
    pub task_queue: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub headers: Headers,
    pub attempt: u32,
    pub randomness_seed: u64,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub workflow_execution_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub workflow_run_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub workflow_task_timeout: Option<Duration>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub continued_execution_run_id: Option<String>,
    #[serde(default)]
    pub parent: Option<ParentInfo>,
    #[serde(default)]
    pub memo: Memo,
    #[serde(default)]
    pub search_attributes: HashMap<String, Payload>,
    #[serde(default)]
    pub last_failure: Option<TemporalFailure>,
}

/// Typed event attributes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAttributes {
    // Lifecycle
    WorkflowExecutionStarted(WorkflowExecutionStartedAttributes),
    WorkflowExecutionCompleted {
        #[serde(default)]
        result: Option<Payload>,
    },
    WorkflowExecutionFailed {
        failure: TemporalFailure,
    },
    WorkflowExecutionCanceled {
        #[serde(default)]
        details: Vec<Payload>,
    },
    WorkflowExecutionTerminated {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        details: Vec<Payload>,
    },
    WorkflowExecutionTimedOut {},
    WorkflowExecutionContinuedAsNew {
        new_execution_run_id: String,
        workflow_type: String,
        #[serde(default)]
        input: Vec<Payload>,
    },
    WorkflowExecutionCancelRequested {},

    // Workflow tasks
    WorkflowTaskScheduled {},
    WorkflowTaskStarted {},
    WorkflowTaskCompleted {},
    WorkflowTaskFailed {
        cause: WorkflowTaskFailedCause,
        #[serde(default)]
        failure: Option<TemporalFailure>,
    },
    WorkflowTaskTimedOut {},

    // Timers
    TimerStarted {
        seq: u32,
        #[serde(with = "crate::common::duration_ms")]
        duration: Duration,
    },
    TimerFired {
        started_event_id: i64,
        seq: u32,
    },
    TimerCanceled {
        seq: u32,
    },

    // Activities
    ActivityTaskScheduled {
        seq: u32,
        activity_id: String,
        activity_type: String,
    },
    ActivityTaskStarted {
        scheduled_event_id: i64,
    },
    ActivityTaskCompleted {
        scheduled_event_id: i64,
        #[serde(default)]
        result: Option<Payload>,
    },
    ActivityTaskFailed {
        scheduled_event_id: i64,
        failure: TemporalFailure,
    },
    ActivityTaskTimedOut {
        scheduled_event_id: i64,
        failure: TemporalFailure,
    },
    ActivityTaskCancelRequested {
        seq: u32,
    },
    ActivityTaskCanceled {
        scheduled_event_id: i64,
        #[serde(default)]
        details: Vec<Payload>,
    },

    // Signals
    WorkflowExecutionSignaled {
        signal_name: String,
        #[serde(default)]
        input: Vec<Payload>,
        #[serde(default)]
        headers: Headers,
    },

    // Child workflows
    StartChildWorkflowExecutionInitiated {
        seq: u32,
        workflow_id: String,
        workflow_type: String,
    },
    StartChildWorkflowExecutionFailed {
        initiated_event_id: i64,
        workflow_id: String,
        workflow_type: String,
        cause: StartChildFailedCause,
    },
    ChildWorkflowExecutionStarted {
        initiated_event_id: i64,
        run_id: String,
    },
    ChildWorkflowExecutionCompleted {
        initiated_event_id: i64,
        #[serde(default)]
        result: Option<Payload>,
    },
    ChildWorkflowExecutionFailed {
        initiated_event_id: i64,
        failure: TemporalFailure,
    },
    ChildWorkflowExecutionCanceled {
        initiated_event_id: i64,
        #[serde(default)]
        details: Vec<Payload>,
    },

    // External workflows
    SignalExternalWorkflowExecutionInitiated {
        seq: u32,
        execution: WorkflowExecution,
        signal_name: String,
    },
    ExternalWorkflowExecutionSignaled {
        initiated_event_id: i64,
    },
    SignalExternalWorkflowExecutionFailed {
        initiated_event_id: i64,
    },
    RequestCancelExternalWorkflowExecutionInitiated {
        seq: u32,
        execution: WorkflowExecution,
    },
    ExternalWorkflowExecutionCancelRequested {
        initiated_event_id: i64,
    },

    // Search attributes
    UpsertWorkflowSearchAttributes {
        #[serde(default)]
        search_attributes: HashMap<String, Payload>,
    },

    // Updates
    WorkflowExecutionUpdateAccepted {
        update_id: String,
        name: String,
        #[serde(default)]
        input: Vec<Payload>,
        #[serde(default)]
        headers: Headers,
    },
    WorkflowExecutionUpdateCompleted {
        update_id: String,
        outcome: UpdateResponseOutcome,
    },
}
