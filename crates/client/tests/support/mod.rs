//! Scriptable in-memory `WorkflowService` backing the client facade tests

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use tempo_core::common::{
    WorkflowExecution, WorkflowExecutionInfo, WorkflowExecutionStatus, WorkflowIdConflictPolicy,
};
use tempo_core::error::{RpcError, RpcErrorKind};
use tempo_core::history::{EventAttributes, HistoryEvent};
use tempo_core::schedule::{ScheduleActionResult, ScheduleInfo, ScheduleListEntry};
use tempo_core::service::*;
use tempo_core::WorkflowService;

#[derive(Default)]
pub struct FakeState {
    /// workflow_id -> (workflow_type, run ids, open?)
    pub workflows: HashMap<String, (String, Vec<String>, bool)>,
    pub start_requests: Vec<StartWorkflowExecutionRequest>,
    pub signal_requests: Vec<SignalWorkflowExecutionRequest>,
    /// run_id -> scripted history poll responses, popped front first
    pub history_script: HashMap<String, VecDeque<Result<HistoryEvent, RpcError>>>,
    pub query_response: Option<Result<QueryWorkflowResponse, RpcError>>,
    pub update_response: Option<UpdateWorkflowExecutionResponse>,
    pub update_poll_script: VecDeque<Result<PollWorkflowExecutionUpdateResponse, RpcError>>,
    pub list_pages: Vec<Vec<WorkflowExecutionInfo>>,
    pub pages_fetched: usize,
    pub count: i64,
    pub schedules: HashMap<String, (tempo_core::schedule::Schedule, ScheduleInfo)>,
    pub update_schedule_calls: usize,
    pub async_rpc_log: Vec<String>,
    pub heartbeat_cancel_requested: bool,
    pub next_run: u64,
}

pub struct FakeService {
    pub state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn with_open_workflow(self: &Arc<Self>, workflow_id: &str, workflow_type: &str) {
        self.state.lock().workflows.insert(
            workflow_id.to_string(),
            (workflow_type.to_string(), vec!["run-existing".to_string()], true),
        );
    }

    pub fn script_history(
        self: &Arc<Self>,
        run_id: &str,
        responses: Vec<Result<HistoryEvent, RpcError>>,
    ) {
        self.state
            .lock()
            .history_script
            .insert(run_id.to_string(), responses.into());
    }

    pub fn close_event(attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent {
            event_id: 99,
            event_time: Utc::now(),
            attributes,
        }
    }
}

fn not_found(what: &str) -> RpcError {
    RpcError::not_found(format!("{what} not found"))
}

#[async_trait]
impl WorkflowService for FakeService {
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, RpcError> {
        let mut state = self.state.lock();

        if let Some((_, runs, open)) = state.workflows.get(&request.workflow_id) {
            if *open {
                match request.workflow_id_conflict_policy {
                    WorkflowIdConflictPolicy::UseExisting => {
                        let run_id = runs.last().cloned().unwrap_or_default();
                        state.start_requests.push(request);
                        return Ok(StartWorkflowExecutionResponse {
                            run_id,
                            started: false,
                        });
                    }
                    _ => {
                        return Err(RpcError::already_exists(
                            runs.last().cloned().unwrap_or_default(),
                        ))
                    }
                }
            }
        }

        state.next_run += 1;
        let run_id = format!("run-{}", state.next_run);
        state.workflows.insert(
            request.workflow_id.clone(),
            (request.workflow_type.clone(), vec![run_id.clone()], true),
        );
        state.start_requests.push(request);
        Ok(StartWorkflowExecutionResponse {
            run_id,
            started: true,
        })
    }

    async fn signal_workflow_execution(
        &self,
        request: SignalWorkflowExecutionRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().signal_requests.push(request);
        Ok(())
    }

    async fn signal_with_start_workflow_execution(
        &self,
        request: SignalWithStartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, RpcError> {
        let signal = SignalWorkflowExecutionRequest {
            namespace: request.start.namespace.clone(),
            workflow_execution: WorkflowExecution::new(request.start.workflow_id.clone(), ""),
            signal_name: request.signal_name.clone(),
            input: request.signal_input.clone(),
            identity: request.start.identity.clone(),
            request_id: "swr".to_string(),
            header: Default::default(),
        };
        self.state.lock().signal_requests.push(signal);
        self.start_workflow_execution(request.start).await
    }

    async fn query_workflow(
        &self,
        _request: QueryWorkflowRequest,
    ) -> Result<QueryWorkflowResponse, RpcError> {
        self.state
            .lock()
            .query_response
            .take()
            .unwrap_or_else(|| Err(RpcError::new(RpcErrorKind::Unimplemented, "no query script")))
    }

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, RpcError> {
        self.state
            .lock()
            .update_response
            .clone()
            .map(|mut response| {
                response.update_ref = UpdateRef {
                    workflow_execution: request.workflow_execution.clone(),
                    update_id: request.update_id.clone(),
                };
                Ok(response)
            })
            .unwrap_or_else(|| Err(RpcError::new(RpcErrorKind::Unimplemented, "no update script")))
    }

    async fn poll_workflow_execution_update(
        &self,
        _request: PollWorkflowExecutionUpdateRequest,
    ) -> Result<PollWorkflowExecutionUpdateResponse, RpcError> {
        self.state
            .lock()
            .update_poll_script
            .pop_front()
            .unwrap_or_else(|| Err(RpcError::new(RpcErrorKind::Unimplemented, "no poll script")))
    }

    async fn describe_workflow_execution(
        &self,
        request: DescribeWorkflowExecutionRequest,
    ) -> Result<DescribeWorkflowExecutionResponse, RpcError> {
        let state = self.state.lock();
        let (workflow_type, runs, open) = state
            .workflows
            .get(&request.execution.workflow_id)
            .ok_or_else(|| not_found("workflow"))?;
        Ok(DescribeWorkflowExecutionResponse {
            workflow_execution_info: WorkflowExecutionInfo {
                execution: WorkflowExecution::new(
                    request.execution.workflow_id.clone(),
                    runs.last().cloned().unwrap_or_default(),
                ),
                workflow_type: workflow_type.clone(),
                start_time: Utc::now(),
                close_time: None,
                status: if *open {
                    WorkflowExecutionStatus::Running
                } else {
                    WorkflowExecutionStatus::Completed
                },
                task_queue: "test-queue".to_string(),
                parent: None,
                memo: Default::default(),
                search_attributes: Default::default(),
                history_length: 1,
            },
        })
    }

    async fn list_workflow_executions(
        &self,
        request: ListWorkflowExecutionsRequest,
    ) -> Result<ListWorkflowExecutionsResponse, RpcError> {
        let mut state = self.state.lock();
        let index = if request.next_page_token.is_empty() {
            0
        } else {
            request.next_page_token[0] as usize
        };
        state.pages_fetched += 1;

        let executions = state.list_pages.get(index).cloned().unwrap_or_default();
        let next_page_token = if index + 1 < state.list_pages.len() {
            vec![(index + 1) as u8]
        } else {
            vec![]
        };
        Ok(ListWorkflowExecutionsResponse {
            executions,
            next_page_token,
        })
    }

    async fn count_workflow_executions(
        &self,
        _request: CountWorkflowExecutionsRequest,
    ) -> Result<CountWorkflowExecutionsResponse, RpcError> {
        Ok(CountWorkflowExecutionsResponse {
            count: self.state.lock().count,
        })
    }

    async fn terminate_workflow_execution(
        &self,
        _request: TerminateWorkflowExecutionRequest,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    async fn request_cancel_workflow_execution(
        &self,
        _request: RequestCancelWorkflowExecutionRequest,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, RpcError> {
        let mut state = self.state.lock();
        let script = state
            .history_script
            .get_mut(&request.execution.run_id)
            .ok_or_else(|| not_found("history"))?;
        match script.pop_front() {
            Some(Ok(event)) => Ok(GetWorkflowExecutionHistoryResponse {
                events: vec![event],
                next_page_token: vec![],
            }),
            Some(Err(e)) => Err(e),
            None => Err(not_found("history page")),
        }
    }

    async fn create_schedule(
        &self,
        request: CreateScheduleRequest,
    ) -> Result<CreateScheduleResponse, RpcError> {
        let mut state = self.state.lock();
        if state.schedules.contains_key(&request.schedule_id) {
            return Err(RpcError::already_exists("schedule exists"));
        }
        let mut info = ScheduleInfo {
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Some(patch) = &request.initial_patch {
            if patch.trigger_immediately.is_some() {
                info.num_actions += 1;
            }
        }
        state
            .schedules
            .insert(request.schedule_id.clone(), (request.schedule, info));
        Ok(CreateScheduleResponse {
            conflict_token: b"token-1".to_vec(),
        })
    }

    async fn describe_schedule(
        &self,
        request: DescribeScheduleRequest,
    ) -> Result<DescribeScheduleResponse, RpcError> {
        let state = self.state.lock();
        let (schedule, info) = state
            .schedules
            .get(&request.schedule_id)
            .ok_or_else(|| not_found("schedule"))?;
        Ok(DescribeScheduleResponse {
            schedule: schedule.clone(),
            info: info.clone(),
            conflict_token: b"token-1".to_vec(),
        })
    }

    async fn patch_schedule(&self, request: PatchScheduleRequest) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        state.next_run += 1;
        let action_run = format!("sched-run-{}", state.next_run);

        let (workflow_id, workflow_type) = {
            let (schedule, _) = state
                .schedules
                .get(&request.schedule_id)
                .ok_or_else(|| not_found("schedule"))?;
            match &schedule.action {
                tempo_core::schedule::ScheduleAction::StartWorkflow(start) => {
                    (start.workflow_id.clone(), start.workflow_type.clone())
                }
            }
        };

        if request.patch.trigger_immediately.is_some() {
            {
                let (_, info) = state
                    .schedules
                    .get_mut(&request.schedule_id)
                    .ok_or_else(|| not_found("schedule"))?;
                info.num_actions += 1;
                info.recent_actions.push(ScheduleActionResult {
                    schedule_time: Utc::now(),
                    actual_time: Utc::now(),
                    start_workflow_result: WorkflowExecution::new(
                        workflow_id.clone(),
                        &action_run,
                    ),
                });
            }
            state
                .workflows
                .insert(workflow_id, (workflow_type, vec![action_run], false));
        }

        if let Some(note) = request.patch.pause.clone() {
            let (schedule, _) = state
                .schedules
                .get_mut(&request.schedule_id)
                .ok_or_else(|| not_found("schedule"))?;
            schedule.state.paused = true;
            schedule.state.note = Some(note);
        }
        if let Some(note) = request.patch.unpause.clone() {
            let (schedule, _) = state
                .schedules
                .get_mut(&request.schedule_id)
                .ok_or_else(|| not_found("schedule"))?;
            schedule.state.paused = false;
            schedule.state.note = Some(note);
        }
        Ok(())
    }

    async fn update_schedule(&self, request: UpdateScheduleRequest) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        state.update_schedule_calls += 1;
        let entry = state
            .schedules
            .get_mut(&request.schedule_id)
            .ok_or_else(|| not_found("schedule"))?;
        entry.0 = request.schedule;
        Ok(())
    }

    async fn delete_schedule(&self, request: DeleteScheduleRequest) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        state
            .schedules
            .remove(&request.schedule_id)
            .ok_or_else(|| not_found("schedule"))?;
        Ok(())
    }

    async fn list_schedules(
        &self,
        _request: ListSchedulesRequest,
    ) -> Result<ListSchedulesResponse, RpcError> {
        let state = self.state.lock();
        let schedules = state
            .schedules
            .iter()
            .map(|(id, (schedule, info))| {
                let workflow_type = match &schedule.action {
                    tempo_core::schedule::ScheduleAction::StartWorkflow(start) => {
                        start.workflow_type.clone()
                    }
                };
                ScheduleListEntry {
                    schedule_id: id.clone(),
                    workflow_type,
                    paused: schedule.state.paused,
                    note: schedule.state.note.clone(),
                    recent_actions: info.recent_actions.clone(),
                    next_action_times: info.next_action_times.clone(),
                }
            })
            .collect();
        Ok(ListSchedulesResponse {
            schedules,
            next_page_token: vec![],
        })
    }

    async fn record_activity_task_heartbeat(
        &self,
        _request: RecordActivityTaskHeartbeatRequest,
    ) -> Result<RecordActivityTaskHeartbeatResponse, RpcError> {
        let mut state = self.state.lock();
        state.async_rpc_log.push("heartbeat:token".to_string());
        Ok(RecordActivityTaskHeartbeatResponse {
            cancel_requested: state.heartbeat_cancel_requested,
        })
    }

    async fn record_activity_task_heartbeat_by_id(
        &self,
        _request: RecordActivityTaskHeartbeatByIdRequest,
    ) -> Result<RecordActivityTaskHeartbeatResponse, RpcError> {
        let mut state = self.state.lock();
        state.async_rpc_log.push("heartbeat:id".to_string());
        Ok(RecordActivityTaskHeartbeatResponse {
            cancel_requested: state.heartbeat_cancel_requested,
        })
    }

    async fn respond_activity_task_completed(
        &self,
        _request: RespondActivityTaskCompletedRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().async_rpc_log.push("complete:token".to_string());
        Ok(())
    }

    async fn respond_activity_task_completed_by_id(
        &self,
        _request: RespondActivityTaskCompletedByIdRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().async_rpc_log.push("complete:id".to_string());
        Ok(())
    }

    async fn respond_activity_task_failed(
        &self,
        _request: RespondActivityTaskFailedRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().async_rpc_log.push("fail:token".to_string());
        Ok(())
    }

    async fn respond_activity_task_failed_by_id(
        &self,
        _request: RespondActivityTaskFailedByIdRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().async_rpc_log.push("fail:id".to_string());
        Ok(())
    }

    async fn respond_activity_task_canceled(
        &self,
        _request: RespondActivityTaskCanceledRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().async_rpc_log.push("cancel:token".to_string());
        Ok(())
    }

    async fn respond_activity_task_canceled_by_id(
        &self,
        _request: RespondActivityTaskCanceledByIdRequest,
    ) -> Result<(), RpcError> {
        self.state.lock().async_rpc_log.push("cancel:id".to_string());
        Ok(())
    }
}
