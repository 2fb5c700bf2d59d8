//! The cluster's workflow service surface
//!
//! `WorkflowService` is the unary RPC boundary the client facade talks to.
//! Field semantics follow the cluster's published definitions; the structs
//! here are the typed form of those wire messages.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{
    WorkflowExecution, WorkflowExecutionInfo, WorkflowIdConflictPolicy, WorkflowIdReusePolicy,
};
use crate::error::RpcError;
use crate::failure::TemporalFailure;
use crate::history::HistoryEvent;
use crate::payload::{Headers, Memo, Payload};
use crate::retry::RetryPolicy;
use crate::schedule::{Schedule, ScheduleInfo, ScheduleListEntry, SchedulePatch};

// =========================================================================
// Workflow lifecycle
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartWorkflowExecutionRequest {
    pub namespace: String,
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    pub identity: String,
    pub request_id: String,
    #[serde(default)]
    pub workflow_id_reuse_policy: WorkflowIdReusePolicy,
    #[serde(default)]
    pub workflow_id_conflict_policy: WorkflowIdConflictPolicy,
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
    pub memo: Memo,
    #[serde(default)]
    pub search_attributes: HashMap<String, Payload>,
    #[serde(default)]
    pub header: Headers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartWorkflowExecutionResponse {
    pub run_id: String,
    /// False when an existing run was returned under a use-existing conflict
    /// policy
    #[serde(default = "default_true")]
    pub started: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalWorkflowExecutionRequest {
    pub namespace: String,
    pub workflow_execution: WorkflowExecution,
    pub signal_name: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    pub identity: String,
    pub request_id: String,
    #[serde(default)]
    pub header: Headers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalWithStartWorkflowExecutionRequest {
    pub start: StartWorkflowExecutionRequest,
    pub signal_name: String,
    #[serde(default)]
    pub signal_input: Vec<Payload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TerminateWorkflowExecutionRequest {
    pub namespace: String,
    pub workflow_execution: WorkflowExecution,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub details: Vec<Payload>,
    pub identity: String,
    #[serde(default)]
    pub first_execution_run_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestCancelWorkflowExecutionRequest {
    pub namespace: String,
    pub workflow_execution: WorkflowExecution,
    pub identity: String,
    pub request_id: String,
    #[serde(default)]
    pub first_execution_run_id: Option<String>,
}

// =========================================================================
// Queries
// =========================================================================

/// When a query should be rejected instead of answered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryRejectCondition {
    /// Reject when the workflow is no longer open
    NotOpen,

    /// Reject when the workflow closed any way other than completed
    NotCompletedCleanly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryWorkflowRequest {
    pub namespace: String,
    pub execution: WorkflowExecution,
    pub query_type: String,
    #[serde(default)]
    pub query_args: Vec<Payload>,
    #[serde(default)]
    pub header: Headers,
    #[serde(default)]
    pub query_reject_condition: Option<QueryRejectCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryWorkflowResponse {
    #[serde(default)]
    pub query_result: Option<Payload>,
    /// Set instead of `query_result` when the reject condition matched
    #[serde(default)]
    pub query_rejected: Option<QueryRejected>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRejected {
    pub status: crate::common::WorkflowExecutionStatus,
}

// =========================================================================
// Updates
// =========================================================================

/// Lifecycle stage an update has reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UpdateLifecycleStage {
    Admitted,
    Accepted,
    Completed,
}

/// Identifies an update on a specific run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRef {
    pub workflow_execution: WorkflowExecution,
    pub update_id: String,
}

/// Terminal outcome of an update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Success {
        #[serde(default)]
        result: Option<Payload>,
    },
    Failure {
        failure: TemporalFailure,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateWorkflowExecutionRequest {
    pub namespace: String,
    pub workflow_execution: WorkflowExecution,
    pub update_id: String,
    pub update_name: String,
    #[serde(default)]
    pub input: Vec<Payload>,
    #[serde(default)]
    pub header: Headers,
    pub identity: String,
    /// Block server-side until the update reaches at least this stage
    pub wait_for_stage: UpdateLifecycleStage,
    #[serde(default)]
    pub first_execution_run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateWorkflowExecutionResponse {
    pub update_ref: UpdateRef,
    /// Stage actually reached when the call returned
    pub stage: UpdateLifecycleStage,
    #[serde(default)]
    pub outcome: Option<UpdateOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollWorkflowExecutionUpdateRequest {
    pub namespace: String,
    pub update_ref: UpdateRef,
    pub identity: String,
    pub wait_for_stage: UpdateLifecycleStage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollWorkflowExecutionUpdateResponse {
    pub stage: UpdateLifecycleStage,
    #[serde(default)]
    pub outcome: Option<UpdateOutcome>,
}

// =========================================================================
// Visibility
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DescribeWorkflowExecutionRequest {
    pub namespace: String,
    pub execution: WorkflowExecution,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescribeWorkflowExecutionResponse {
    pub workflow_execution_info: WorkflowExecutionInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListWorkflowExecutionsRequest {
    pub namespace: String,
    pub page_size: i32,
    #[serde(default)]
    pub next_page_token: Vec<u8>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListWorkflowExecutionsResponse {
    #[serde(default)]
    pub executions: Vec<WorkflowExecutionInfo>,
    #[serde(default)]
    pub next_page_token: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CountWorkflowExecutionsRequest {
    pub namespace: String,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CountWorkflowExecutionsResponse {
    pub count: i64,
}

/// Which events a history fetch returns
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventFilterType {
    #[default]
    AllEvent,
    CloseEvent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GetWorkflowExecutionHistoryRequest {
    pub namespace: String,
    pub execution: WorkflowExecution,
    #[serde(default)]
    pub maximum_page_size: i32,
    #[serde(default)]
    pub next_page_token: Vec<u8>,
    /// Long-poll until new matching events exist
    #[serde(default)]
    pub wait_new_event: bool,
    #[serde(default)]
    pub history_event_filter_type: HistoryEventFilterType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GetWorkflowExecutionHistoryResponse {
    #[serde(default)]
    pub events: Vec<HistoryEvent>,
    #[serde(default)]
    pub next_page_token: Vec<u8>,
}

// =========================================================================
// Schedules
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateScheduleRequest {
    pub namespace: String,
    pub schedule_id: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub initial_patch: Option<SchedulePatch>,
    pub identity: String,
    pub request_id: String,
    #[serde(default)]
    pub memo: Memo,
    #[serde(default)]
    pub search_attributes: HashMap<String, Payload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateScheduleResponse {
    #[serde(default)]
    pub conflict_token: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DescribeScheduleRequest {
    pub namespace: String,
    pub schedule_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescribeScheduleResponse {
    pub schedule: Schedule,
    pub info: ScheduleInfo,
    #[serde(default)]
    pub conflict_token: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchScheduleRequest {
    pub namespace: String,
    pub schedule_id: String,
    pub patch: SchedulePatch,
    pub identity: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateScheduleRequest {
    pub namespace: String,
    pub schedule_id: String,
    pub schedule: Schedule,
    /// Carried when the caller obtained one from describe; the server does
    /// not currently enforce mismatches
    #[serde(default)]
    pub conflict_token: Option<Vec<u8>>,
    pub identity: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeleteScheduleRequest {
    pub namespace: String,
    pub schedule_id: String,
    pub identity: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListSchedulesRequest {
    pub namespace: String,
    pub maximum_page_size: i32,
    #[serde(default)]
    pub next_page_token: Vec<u8>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListSchedulesResponse {
    #[serde(default)]
    pub schedules: Vec<ScheduleListEntry>,
    #[serde(default)]
    pub next_page_token: Vec<u8>,
}

// =========================================================================
// Async activity completion
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordActivityTaskHeartbeatRequest {
    pub namespace: String,
    pub task_token: Vec<u8>,
    #[serde(default)]
    pub details: Vec<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordActivityTaskHeartbeatByIdRequest {
    pub namespace: String,
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: String,
    pub activity_id: String,
    #[serde(default)]
    pub details: Vec<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordActivityTaskHeartbeatResponse {
    #[serde(default)]
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespondActivityTaskCompletedRequest {
    pub namespace: String,
    pub task_token: Vec<u8>,
    #[serde(default)]
    pub result: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespondActivityTaskCompletedByIdRequest {
    pub namespace: String,
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: String,
    pub activity_id: String,
    #[serde(default)]
    pub result: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RespondActivityTaskFailedRequest {
    pub namespace: String,
    pub task_token: Vec<u8>,
    pub failure: TemporalFailure,
    #[serde(default)]
    pub last_heartbeat_details: Vec<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RespondActivityTaskFailedByIdRequest {
    pub namespace: String,
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: String,
    pub activity_id: String,
    pub failure: TemporalFailure,
    pub identity: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespondActivityTaskCanceledRequest {
    pub namespace: String,
    pub task_token: Vec<u8>,
    #[serde(default)]
    pub details: Vec<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespondActivityTaskCanceledByIdRequest {
    pub namespace: String,
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: String,
    pub activity_id: String,
    #[serde(default)]
    pub details: Vec<Payload>,
    pub identity: String,
}

// =========================================================================
// The service trait
// =========================================================================

/// The cluster's unary workflow service
///
/// Implementations wrap a transport (gRPC in production, in-memory fakes in
/// tests). Every method corresponds to one RPC; errors are surfaced through
/// the [`RpcError`] kind projection.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, RpcError>;

    async fn signal_workflow_execution(
        &self,
        request: SignalWorkflowExecutionRequest,
    ) -> Result<(), RpcError>;

    async fn signal_with_start_workflow_execution(
        &self,
        request: SignalWithStartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, RpcError>;

    async fn query_workflow(
        &self,
        request: QueryWorkflowRequest,
    ) -> Result<QueryWorkflowResponse, RpcError>;

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, RpcError>;

    async fn poll_workflow_execution_update(
        &self,
        request: PollWorkflowExecutionUpdateRequest,
    ) -> Result<PollWorkflowExecutionUpdateResponse, RpcError>;

    async fn describe_workflow_execution(
        &self,
        request: DescribeWorkflowExecutionRequest,
    ) -> Result<DescribeWorkflowExecutionResponse, RpcError>;

    async fn list_workflow_executions(
        &self,
        request: ListWorkflowExecutionsRequest,
    ) -> Result<ListWorkflowExecutionsResponse, RpcError>;

    async fn count_workflow_executions(
        &self,
        request: CountWorkflowExecutionsRequest,
    ) -> Result<CountWorkflowExecutionsResponse, RpcError>;

    async fn terminate_workflow_execution(
        &self,
        request: TerminateWorkflowExecutionRequest,
    ) -> Result<(), RpcError>;

    async fn request_cancel_workflow_execution(
        &self,
        request: RequestCancelWorkflowExecutionRequest,
    ) -> Result<(), RpcError>;

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, RpcError>;

    async fn create_schedule(
        &self,
        request: CreateScheduleRequest,
    ) -> Result<CreateScheduleResponse, RpcError>;

    async fn describe_schedule(
        &self,
        request: DescribeScheduleRequest,
    ) -> Result<DescribeScheduleResponse, RpcError>;

    async fn patch_schedule(&self, request: PatchScheduleRequest) -> Result<(), RpcError>;

    async fn update_schedule(&self, request: UpdateScheduleRequest) -> Result<(), RpcError>;

    async fn delete_schedule(&self, request: DeleteScheduleRequest) -> Result<(), RpcError>;

    async fn list_schedules(
        &self,
        request: ListSchedulesRequest,
    ) -> Result<ListSchedulesResponse, RpcError>;

    async fn record_activity_task_heartbeat(
        &self,
        request: RecordActivityTaskHeartbeatRequest,
    ) -> Result<RecordActivityTaskHeartbeatResponse, RpcError>;

    async fn record_activity_task_heartbeat_by_id(
        &self,
        request: RecordActivityTaskHeartbeatByIdRequest,
    ) -> Result<RecordActivityTaskHeartbeatResponse, RpcError>;

    async fn respond_activity_task_completed(
        &self,
        request: RespondActivityTaskCompletedRequest,
    ) -> Result<(), RpcError>;

    async fn respond_activity_task_completed_by_id(
        &self,
        request: RespondActivityTaskCompletedByIdRequest,
    ) -> Result<(), RpcError>;

    async fn respond_activity_task_failed(
        &self,
        request: RespondActivityTaskFailedRequest,
    ) -> Result<(), RpcError>;

    async fn respond_activity_task_failed_by_id(
        &self,
        request: RespondActivityTaskFailedByIdRequest,
    ) -> Result<(), RpcError>;

    async fn respond_activity_task_canceled(
        &self,
        request: RespondActivityTaskCanceledRequest,
    ) -> Result<(), RpcError>;

    async fn respond_activity_task_canceled_by_id(
        &self,
        request: RespondActivityTaskCanceledByIdRequest,
    ) -> Result<(), RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_stage_ordering() {
        assert!(UpdateLifecycleStage::Admitted < UpdateLifecycleStage::Accepted);
        assert!(UpdateLifecycleStage::Accepted < UpdateLifecycleStage::Completed);
    }

    #[test]
    fn test_start_request_serialization() {
        let request = StartWorkflowExecutionRequest {
            namespace: "default".to_string(),
            workflow_id: "order-1".to_string(),
            workflow_type: "OrderWorkflow".to_string(),
            task_queue: "orders".to_string(),
            identity: "client-1".to_string(),
            request_id: "req-1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: StartWorkflowExecutionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, parsed);
    }
}
