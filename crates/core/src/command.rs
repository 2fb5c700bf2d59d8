//! Commands produced by the workflow engine per activation
//!
//! Commands accumulate in a per-activation buffer and are emitted atomically
//! when the activation completes. Sequence numbers are assigned by the engine
//! and tie a command to the later history event that resolves it.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::WorkflowExecution;
use crate::failure::TemporalFailure;
use crate::payload::{Headers, Memo, Payload};
use crate::retry::RetryPolicy;
use crate::search::SearchAttributeValue;

/// Attributes of a schedule-activity command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleActivityCmd {
    pub seq: u32,
    pub activity_id: String,
    pub activity_type: String,
    pub task_queue: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub schedule_to_close_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub schedule_to_start_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub start_to_close_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub heartbeat_timeout: Option<Duration>,
}

/// Attributes of a start-child-workflow command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartChildWorkflowCmd {
    pub seq: u32,
    pub namespace: String,
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub execution_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub run_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub task_timeout: Option<Duration>,
    #[serde(default)]
    pub memo: Memo,
    #[serde(default)]
    pub cron_schedule: Option<String>,
}

/// Attributes of a continue-as-new command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContinueAsNewCmd {
    pub workflow_type: String,
    pub task_queue: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub run_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub task_timeout: Option<Duration>,
    #[serde(default)]
    pub memo: Memo,
}

/// Outcome attached to an update response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateResponseOutcome {
    Success {
        #[serde(default)]
        result: Option<Payload>,
    },
    Failure {
        failure: TemporalFailure,
    },
}

/// Result attached to a query response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResult {
    Answered {
        #[serde(default)]
        result: Option<Payload>,
    },
    Failed {
        failure: TemporalFailure,
    },
}

/// The engine's outbound decisions for one activation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowCommand {
    ScheduleActivity(ScheduleActivityCmd),

    CancelActivity {
        seq: u32,
    },

    StartTimer {
        seq: u32,
        #[serde(with = "crate::common::duration_ms")]
        duration: Duration,
        #[serde(default)]
        summary: Option<String>,
    },

    CancelTimer {
        seq: u32,
    },

    StartChildWorkflow(StartChildWorkflowCmd),

    CancelChildWorkflow {
        seq: u32,
    },

    SignalExternalWorkflow {
        seq: u32,
        execution: WorkflowExecution,
        signal_name: String,
        #[serde(default)]
        input: Vec<Payload>,
        #[serde(default)]
        headers: Headers,
    },

    CancelExternalWorkflow {
        seq: u32,
        execution: WorkflowExecution,
    },

    CompleteWorkflow {
        #[serde(default)]
        result: Option<Payload>,
    },

    FailWorkflow {
        failure: TemporalFailure,
    },

    CancelWorkflow {
        #[serde(default)]
        details: Vec<Payload>,
    },

    ContinueAsNew(ContinueAsNewCmd),

    UpsertSearchAttributes {
        attributes: HashMap<String, SearchAttributeValue>,
    },

    AcceptUpdate {
        id: String,
    },

    RejectUpdate {
        id: String,
        failure: TemporalFailure,
    },

    RespondUpdate {
        id: String,
        outcome: UpdateResponseOutcome,
    },

    QueryResponse {
        id: String,
        result: QueryResult,
    },
}

impl WorkflowCommand {
    /// Short name used in non-determinism diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScheduleActivity(_) => "ScheduleActivity",
            Self::CancelActivity { .. } => "CancelActivity",
            Self::StartTimer { .. } => "StartTimer",
            Self::CancelTimer { .. } => "CancelTimer",
            Self::StartChildWorkflow(_) => "StartChildWorkflow",
            Self::CancelChildWorkflow { .. } => "CancelChildWorkflow",
            Self::SignalExternalWorkflow { .. } => "SignalExternalWorkflow",
            Self::CancelExternalWorkflow { .. } => "CancelExternalWorkflow",
            Self::CompleteWorkflow { .. } => "CompleteWorkflow",
            Self::FailWorkflow { .. } => "FailWorkflow",
            Self::CancelWorkflow { .. } => "CancelWorkflow",
            Self::ContinueAsNew(_) => "ContinueAsNew",
            Self::UpsertSearchAttributes { .. } => "UpsertSearchAttributes",
            Self::AcceptUpdate { .. } => "AcceptUpdate",
            Self::RejectUpdate { .. } => "RejectUpdate",
            Self::RespondUpdate { .. } => "RespondUpdate",
            Self::QueryResponse { .. } => "QueryResponse",
        }
    }

    /// Whether this command terminates the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflow { .. }
                | Self::FailWorkflow { .. }
                | Self::CancelWorkflow { .. }
                | Self::ContinueAsNew(_)
        )
    }

    /// Whether this command is recorded in history and must match an event
    /// during replay
    ///
    /// Child-workflow cancellation is routed through the child's own
    /// history, so it carries no parent event to match against.
    pub fn is_history_tracked(&self) -> bool {
        !matches!(
            self,
            Self::QueryResponse { .. }
                | Self::AcceptUpdate { .. }
                | Self::RejectUpdate { .. }
                | Self::RespondUpdate { .. }
                | Self::CancelChildWorkflow { .. }
        )
    }
}
