//! Schedule model
//!
//! A schedule is cluster-owned state that periodically starts a workflow.
//! The SDK carries the full configuration for create/describe/update and the
//! patch operations (trigger, backfill, pause, unpause).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::WorkflowExecution;
use crate::payload::{Headers, Memo, Payload};
use crate::retry::RetryPolicy;

/// What to do when an action would start while the previous one still runs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOverlapPolicy {
    /// Drop the new action
    #[default]
    Skip,

    /// Buffer at most one action to start after the current one closes
    BufferOne,

    /// Buffer every action
    BufferAll,

    /// Cancel the running action, then start
    CancelOther,

    /// Terminate the running action, then start
    TerminateOther,

    /// Start regardless
    AllowAll,
}

/// An inclusive range with a step, used by calendar specifications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleRange {
    pub start: i32,
    pub end: i32,
    pub step: i32,
}

impl ScheduleRange {
    /// A single-value range
    pub fn exactly(value: i32) -> Self {
        Self {
            start: value,
            end: value,
            step: 1,
        }
    }
}

/// Calendar-based specification; empty fields match every value
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleCalendarSpec {
    #[serde(default)]
    pub second: Vec<ScheduleRange>,
    #[serde(default)]
    pub minute: Vec<ScheduleRange>,
    #[serde(default)]
    pub hour: Vec<ScheduleRange>,
    #[serde(default)]
    pub day_of_month: Vec<ScheduleRange>,
    #[serde(default)]
    pub month: Vec<ScheduleRange>,
    #[serde(default)]
    pub year: Vec<ScheduleRange>,
    #[serde(default)]
    pub day_of_week: Vec<ScheduleRange>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Interval-based specification: fires every `every`, shifted by `offset`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleIntervalSpec {
    #[serde(with = "crate::common::duration_ms")]
    pub every: Duration,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub offset: Option<Duration>,
}

/// When a schedule should fire
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub calendars: Vec<ScheduleCalendarSpec>,
    #[serde(default)]
    pub intervals: Vec<ScheduleIntervalSpec>,
    #[serde(default)]
    pub cron_expressions: Vec<String>,
    /// Moments matched here are skipped even if matched above
    #[serde(default)]
    pub skip: Vec<ScheduleCalendarSpec>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub jitter: Option<Duration>,
    #[serde(default)]
    pub time_zone_name: Option<String>,
}

/// The workflow start a schedule performs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleActionStartWorkflow {
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub execution_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub run_timeout: Option<Duration>,
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub task_timeout: Option<Duration>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub memo: Memo,
    #[serde(default)]
    pub search_attributes: HashMap<String, Payload>,
}

/// Action taken when a schedule fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleAction {
    StartWorkflow(ScheduleActionStartWorkflow),
}

/// Overlap and catchup behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulePolicy {
    #[serde(default)]
    pub overlap: ScheduleOverlapPolicy,

    /// How far back missed actions are made up after an outage
    #[serde(with = "crate::common::duration_ms")]
    pub catchup_window: Duration,

    /// Pause the schedule when an action fails or times out
    #[serde(default)]
    pub pause_on_failure: bool,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            overlap: ScheduleOverlapPolicy::Skip,
            catchup_window: Duration::from_secs(365 * 24 * 60 * 60),
            pause_on_failure: false,
        }
    }
}

/// Mutable schedule state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleState {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub paused: bool,
    /// When true, the schedule stops after `remaining_actions` runs out
    #[serde(default)]
    pub limited_actions: bool,
    #[serde(default)]
    pub remaining_actions: u64,
}

/// A complete schedule definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub action: ScheduleAction,
    #[serde(default)]
    pub spec: ScheduleSpec,
    #[serde(default)]
    pub policy: SchedulePolicy,
    #[serde(default)]
    pub state: ScheduleState,
}

/// A backfill request: treat the period as if it had occurred live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleBackfill {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub overlap: Option<ScheduleOverlapPolicy>,
}

/// One action the schedule has taken
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleActionResult {
    /// Nominal fire time
    pub schedule_time: DateTime<Utc>,

    /// When the action actually started
    pub actual_time: DateTime<Utc>,

    /// The started workflow
    pub start_workflow_result: WorkflowExecution,
}

/// Server-maintained schedule bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleInfo {
    #[serde(default)]
    pub num_actions: u64,
    #[serde(default)]
    pub num_actions_missed_catchup_window: u64,
    #[serde(default)]
    pub num_actions_skipped_overlap: u64,
    #[serde(default)]
    pub running_actions: Vec<WorkflowExecution>,
    #[serde(default)]
    pub recent_actions: Vec<ScheduleActionResult>,
    #[serde(default)]
    pub next_action_times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// A trigger-immediately patch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleTriggerImmediately {
    #[serde(default)]
    pub overlap: Option<ScheduleOverlapPolicy>,
}

/// A patch applied to a schedule without replacing its definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulePatch {
    #[serde(default)]
    pub trigger_immediately: Option<ScheduleTriggerImmediately>,
    #[serde(default)]
    pub backfill_request: Vec<ScheduleBackfill>,
    /// Pause with the given note
    #[serde(default)]
    pub pause: Option<String>,
    /// Unpause with the given note
    #[serde(default)]
    pub unpause: Option<String>,
}

/// One entry of a schedule listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleListEntry {
    pub schedule_id: String,
    pub workflow_type: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub recent_actions: Vec<ScheduleActionResult>,
    #[serde(default)]
    pub next_action_times: Vec<DateTime<Utc>>,
}
