//! In-memory cluster simulation backing the worker integration tests
//!
//! `SimCluster` plays the server side of the bridge: it turns commands into
//! follow-up activations, dispatches scheduled activities to the activity
//! poller with retry handling, and records terminal outcomes. Timers are
//! virtual: tests fire the next pending timer explicitly with
//! [`SimCluster::advance_time`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use tempo_core::bridge::{
    ActivationJob, ActivityExecutionResult, ActivityHeartbeat, ActivityResolution, ActivityStart,
    ActivityTask, ActivityTaskCompletion, ActivityTaskVariant, BridgeError, CoreBridge,
    WorkflowActivation, WorkflowActivationCompletion,
};
use tempo_core::bridge::ActivationStatus;
use tempo_core::command::{QueryResult, ScheduleActivityCmd, UpdateResponseOutcome,
    WorkflowCommand};
use tempo_core::common::WorkflowExecution;
use tempo_core::failure::{FailureInfo, TemporalFailure};
use tempo_core::history::{WorkflowExecutionStartedAttributes, WorkflowTaskFailedCause};
use tempo_core::payload::{Headers, Payload};
use tempo_core::retry::RetryPolicy;

/// Terminal outcome of a simulated run
#[derive(Debug, Clone)]
pub enum SimOutcome {
    Completed(Option<Payload>),
    Failed(TemporalFailure),
    Cancelled,
    ContinuedAsNew { new_run_id: String },
}

#[derive(Debug, Clone)]
pub enum SimUpdateOutcome {
    Rejected(TemporalFailure),
    Success(Option<Payload>),
    Failure(TemporalFailure),
}

struct PendingActivity {
    run_id: String,
    seq: u32,
    cmd: ScheduleActivityCmd,
    attempt: u32,
    claimed: bool,
}

struct PendingTimer {
    run_id: String,
    seq: u32,
    duration: Duration,
}

#[derive(Default)]
struct SimState {
    wf_queue: VecDeque<WorkflowActivation>,
    act_queue: VecDeque<ActivityTask>,
    /// workflow_id -> run ids in chain order
    chains: HashMap<String, Vec<String>>,
    /// run_id -> workflow_id
    run_owners: HashMap<String, String>,
    outcomes: HashMap<String, SimOutcome>,
    task_failures: Vec<(String, WorkflowTaskFailedCause, TemporalFailure)>,
    activities: HashMap<u64, PendingActivity>,
    timers: Vec<PendingTimer>,
    queries: HashMap<String, oneshot::Sender<QueryResult>>,
    updates: HashMap<String, oneshot::Sender<SimUpdateOutcome>>,
    heartbeats: Vec<ActivityHeartbeat>,
    async_tokens: Vec<u64>,
    next_token: u64,
    next_run: u64,
    next_id: u64,
    shutdown: bool,
}

pub struct SimCluster {
    state: Mutex<SimState>,
    wf_notify: Notify,
    act_notify: Notify,
}

impl SimCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState::default()),
            wf_notify: Notify::new(),
            act_notify: Notify::new(),
        })
    }

    // =====================================================================
    // Test-facing API
    // =====================================================================

    pub fn start_workflow(
        &self,
        workflow_type: &str,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> String {
        let payload = json_payload(&input);
        let mut state = self.state.lock();
        state.next_run += 1;
        let run_id = format!("run-{}", state.next_run);

        state
            .chains
            .entry(workflow_id.to_string())
            .or_default()
            .push(run_id.clone());
        state
            .run_owners
            .insert(run_id.clone(), workflow_id.to_string());

        let seed = state.next_run;
        state.wf_queue.push_back(WorkflowActivation {
            run_id: run_id.clone(),
            timestamp: Utc::now(),
            is_replaying: false,
            history_length: 1,
            jobs: vec![ActivationJob::InitializeWorkflow {
                workflow_id: workflow_id.to_string(),
                attributes: started_attributes(workflow_type, vec![payload], seed),
            }],
        });
        drop(state);
        self.wf_notify.notify_one();
        run_id
    }

    /// Deliver one or more signals in a single activation
    pub fn signal_batch(&self, workflow_id: &str, signals: Vec<(&str, serde_json::Value)>) {
        let jobs = signals
            .into_iter()
            .map(|(name, input)| ActivationJob::SignalWorkflow {
                signal_name: name.to_string(),
                input: vec![json_payload(&input)],
                headers: Headers::default(),
            })
            .collect();
        self.push_jobs(workflow_id, jobs);
    }

    pub fn signal(&self, workflow_id: &str, name: &str, input: serde_json::Value) {
        self.signal_batch(workflow_id, vec![(name, input)]);
    }

    pub async fn query(
        &self,
        workflow_id: &str,
        query_type: &str,
        input: serde_json::Value,
    ) -> QueryResult {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.next_id += 1;
            let query_id = format!("query-{}", state.next_id);
            state.queries.insert(query_id.clone(), tx);
            let run_id = latest_run(&state, workflow_id);
            state.wf_queue.push_back(WorkflowActivation {
                run_id,
                timestamp: Utc::now(),
                is_replaying: false,
                history_length: 0,
                jobs: vec![ActivationJob::QueryWorkflow {
                    query_id,
                    query_type: query_type.to_string(),
                    arguments: vec![json_payload(&input)],
                    headers: Headers::default(),
                }],
            });
        }
        self.wf_notify.notify_one();
        rx.await.expect("query response should arrive")
    }

    pub async fn update(
        &self,
        workflow_id: &str,
        name: &str,
        input: serde_json::Value,
    ) -> SimUpdateOutcome {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.next_id += 1;
            let update_id = format!("update-{}", state.next_id);
            state.updates.insert(update_id.clone(), tx);
            let run_id = latest_run(&state, workflow_id);
            state.wf_queue.push_back(WorkflowActivation {
                run_id,
                timestamp: Utc::now(),
                is_replaying: false,
                history_length: 0,
                jobs: vec![ActivationJob::DoUpdate {
                    id: update_id,
                    name: name.to_string(),
                    input: vec![json_payload(&input)],
                    headers: Headers::default(),
                    run_validator: true,
                }],
            });
        }
        self.wf_notify.notify_one();
        rx.await.expect("update outcome should arrive")
    }

    pub fn cancel_workflow(&self, workflow_id: &str) {
        self.push_jobs(
            workflow_id,
            vec![ActivationJob::CancelWorkflow { details: vec![] }],
        );
    }

    /// Fire the shortest pending timer, if any. Returns whether one fired.
    pub fn advance_time(&self) -> bool {
        let mut state = self.state.lock();
        if state.timers.is_empty() {
            return false;
        }
        let shortest = state
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| t.duration)
            .map(|(i, _)| i)
            .expect("non-empty");
        let timer = state.timers.remove(shortest);
        state.wf_queue.push_back(WorkflowActivation {
            run_id: timer.run_id,
            timestamp: Utc::now(),
            is_replaying: false,
            history_length: 0,
            jobs: vec![ActivationJob::FireTimer { seq: timer.seq }],
        });
        drop(state);
        self.wf_notify.notify_one();
        true
    }

    /// Wait until the given workflow's latest run reached a terminal state
    pub async fn outcome(&self, workflow_id: &str) -> SimOutcome {
        loop {
            {
                let state = self.state.lock();
                let run_id = latest_run(&state, workflow_id);
                if let Some(outcome) = state.outcomes.get(&run_id) {
                    if !matches!(outcome, SimOutcome::ContinuedAsNew { .. }) {
                        return outcome.clone();
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn run_outcome(&self, run_id: &str) -> Option<SimOutcome> {
        self.state.lock().outcomes.get(run_id).cloned()
    }

    pub fn runs_of(&self, workflow_id: &str) -> Vec<String> {
        self.state
            .lock()
            .chains
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn recorded_heartbeats(&self) -> Vec<ActivityHeartbeat> {
        self.state.lock().heartbeats.clone()
    }

    pub fn pending_timer_count(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn task_failures(&self) -> Vec<(String, WorkflowTaskFailedCause, TemporalFailure)> {
        self.state.lock().task_failures.clone()
    }

    /// Tokens of activities that reported async completion
    pub fn async_activity_tokens(&self) -> Vec<u64> {
        self.state.lock().async_tokens.clone()
    }

    /// Complete an async activity from "outside"
    pub fn complete_async_activity(&self, token: u64, result: serde_json::Value) {
        let mut state = self.state.lock();
        if let Some(pending) = state.activities.remove(&token) {
            state.wf_queue.push_back(WorkflowActivation {
                run_id: pending.run_id,
                timestamp: Utc::now(),
                is_replaying: false,
                history_length: 0,
                jobs: vec![ActivationJob::ResolveActivity {
                    seq: pending.seq,
                    resolution: ActivityResolution::Completed {
                        result: Some(json_payload(&result)),
                    },
                }],
            });
        }
        drop(state);
        self.wf_notify.notify_one();
    }

    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        // notify_one stores a permit, so a poller between its queue check
        // and its await still observes the shutdown
        self.wf_notify.notify_one();
        self.act_notify.notify_one();
    }

    // =====================================================================
    // Internals
    // =====================================================================

    fn push_jobs(&self, workflow_id: &str, jobs: Vec<ActivationJob>) {
        {
            let mut state = self.state.lock();
            let run_id = latest_run(&state, workflow_id);
            state.wf_queue.push_back(WorkflowActivation {
                run_id,
                timestamp: Utc::now(),
                is_replaying: false,
                history_length: 0,
                jobs,
            });
        }
        self.wf_notify.notify_one();
    }

    fn process_commands(&self, run_id: String, commands: Vec<WorkflowCommand>) {
        let mut state = self.state.lock();
        let mut notify_act = false;
        let mut notify_wf = false;

        for command in commands {
            match command {
                WorkflowCommand::StartTimer { seq, duration, .. } => {
                    state.timers.push(PendingTimer {
                        run_id: run_id.clone(),
                        seq,
                        duration,
                    });
                }
                WorkflowCommand::CancelTimer { seq } => {
                    state
                        .timers
                        .retain(|t| !(t.run_id == run_id && t.seq == seq));
                }
                WorkflowCommand::ScheduleActivity(cmd) => {
                    state.next_token += 1;
                    let token = state.next_token;
                    let seq = cmd.seq;
                    state.activities.insert(
                        token,
                        PendingActivity {
                            run_id: run_id.clone(),
                            seq,
                            cmd: cmd.clone(),
                            attempt: 1,
                            claimed: false,
                        },
                    );
                    state
                        .act_queue
                        .push_back(start_task(token, &run_id, &cmd, 1));
                    notify_act = true;
                }
                WorkflowCommand::CancelActivity { seq } => {
                    let token = state
                        .activities
                        .iter()
                        .find(|(_, a)| a.run_id == run_id && a.seq == seq)
                        .map(|(t, _)| *t);
                    if let Some(token) = token {
                        let claimed = state.activities[&token].claimed;
                        if claimed {
                            state.act_queue.push_back(ActivityTask {
                                task_token: token.to_be_bytes().to_vec(),
                                variant: ActivityTaskVariant::Cancel {
                                    reason: tempo_core::bridge::ActivityCancelReason::Cancelled,
                                },
                            });
                            notify_act = true;
                        } else {
                            // Never started; resolve as cancelled right away
                            state.activities.remove(&token);
                            state.wf_queue.push_back(WorkflowActivation {
                                run_id: run_id.clone(),
                                timestamp: Utc::now(),
                                is_replaying: false,
                                history_length: 0,
                                jobs: vec![ActivationJob::ResolveActivity {
                                    seq,
                                    resolution: ActivityResolution::Cancelled {
                                        failure: TemporalFailure::cancelled(
                                            "activity cancel requested",
                                        ),
                                    },
                                }],
                            });
                            notify_wf = true;
                        }
                    }
                }
                WorkflowCommand::CompleteWorkflow { result } => {
                    state
                        .outcomes
                        .insert(run_id.clone(), SimOutcome::Completed(result));
                }
                WorkflowCommand::FailWorkflow { failure } => {
                    state
                        .outcomes
                        .insert(run_id.clone(), SimOutcome::Failed(failure));
                }
                WorkflowCommand::CancelWorkflow { .. } => {
                    state.outcomes.insert(run_id.clone(), SimOutcome::Cancelled);
                }
                WorkflowCommand::ContinueAsNew(cmd) => {
                    state.next_run += 1;
                    let new_run_id = format!("run-{}", state.next_run);
                    let workflow_id = state
                        .run_owners
                        .get(&run_id)
                        .cloned()
                        .expect("run should have an owner");
                    state.outcomes.insert(
                        run_id.clone(),
                        SimOutcome::ContinuedAsNew {
                            new_run_id: new_run_id.clone(),
                        },
                    );
                    state
                        .chains
                        .get_mut(&workflow_id)
                        .expect("chain exists")
                        .push(new_run_id.clone());
                    state
                        .run_owners
                        .insert(new_run_id.clone(), workflow_id.clone());
                    let seed = state.next_run;
                    state.wf_queue.push_back(WorkflowActivation {
                        run_id: new_run_id,
                        timestamp: Utc::now(),
                        is_replaying: false,
                        history_length: 1,
                        jobs: vec![ActivationJob::InitializeWorkflow {
                            workflow_id,
                            attributes: started_attributes(
                                &cmd.workflow_type,
                                cmd.input.clone(),
                                seed,
                            ),
                        }],
                    });
                    notify_wf = true;
                }
                WorkflowCommand::QueryResponse { id, result } => {
                    if let Some(tx) = state.queries.remove(&id) {
                        let _ = tx.send(result);
                    }
                }
                WorkflowCommand::RejectUpdate { id, failure } => {
                    if let Some(tx) = state.updates.remove(&id) {
                        let _ = tx.send(SimUpdateOutcome::Rejected(failure));
                    }
                }
                WorkflowCommand::AcceptUpdate { .. } => {}
                WorkflowCommand::RespondUpdate { id, outcome } => {
                    if let Some(tx) = state.updates.remove(&id) {
                        let _ = tx.send(match outcome {
                            UpdateResponseOutcome::Success { result } => {
                                SimUpdateOutcome::Success(result)
                            }
                            UpdateResponseOutcome::Failure { failure } => {
                                SimUpdateOutcome::Failure(failure)
                            }
                        });
                    }
                }
                WorkflowCommand::UpsertSearchAttributes { .. } => {}
                other => panic!("command not supported by the simulator: {}", other.kind()),
            }
        }

        drop(state);
        if notify_act {
            self.act_notify.notify_one();
        }
        if notify_wf {
            self.wf_notify.notify_one();
        }
    }

    fn process_activity_completion(&self, completion: ActivityTaskCompletion) {
        let token = u64::from_be_bytes(
            completion.task_token[..8]
                .try_into()
                .expect("8-byte token"),
        );

        let mut state = self.state.lock();
        let Some(pending) = state.activities.get(&token) else {
            return;
        };
        let run_id = pending.run_id.clone();
        let seq = pending.seq;

        let resolution = match completion.result {
            ActivityExecutionResult::Completed { result } => {
                state.activities.remove(&token);
                Some(ActivityResolution::Completed { result })
            }
            ActivityExecutionResult::Cancelled { failure } => {
                state.activities.remove(&token);
                Some(ActivityResolution::Cancelled { failure })
            }
            ActivityExecutionResult::WillCompleteAsync => {
                state.async_tokens.push(token);
                None
            }
            ActivityExecutionResult::Failed { failure } => {
                let pending = state.activities.get_mut(&token).expect("checked above");
                if should_retry(&pending.cmd.retry_policy, pending.attempt, &failure) {
                    pending.attempt += 1;
                    pending.claimed = false;
                    let attempt = pending.attempt;
                    let cmd = pending.cmd.clone();
                    state
                        .act_queue
                        .push_back(start_task(token, &run_id, &cmd, attempt));
                    drop(state);
                    self.act_notify.notify_one();
                    return;
                }
                state.activities.remove(&token);
                Some(ActivityResolution::Failed { failure })
            }
        };

        if let Some(resolution) = resolution {
            state.wf_queue.push_back(WorkflowActivation {
                run_id,
                timestamp: Utc::now(),
                is_replaying: false,
                history_length: 0,
                jobs: vec![ActivationJob::ResolveActivity { seq, resolution }],
            });
            drop(state);
            self.wf_notify.notify_one();
        }
    }
}

#[async_trait]
impl CoreBridge for SimCluster {
    async fn poll_workflow_activation(&self) -> Result<WorkflowActivation, BridgeError> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(activation) = state.wf_queue.pop_front() {
                    return Ok(activation);
                }
                if state.shutdown {
                    return Err(BridgeError::ShutDown);
                }
            }
            self.wf_notify.notified().await;
        }
    }

    async fn complete_workflow_activation(
        &self,
        completion: WorkflowActivationCompletion,
    ) -> Result<(), BridgeError> {
        match completion.status {
            ActivationStatus::Completed { commands } => {
                self.process_commands(completion.run_id, commands);
            }
            ActivationStatus::Failed { cause, failure } => {
                self.state
                    .lock()
                    .task_failures
                    .push((completion.run_id, cause, failure));
            }
        }
        Ok(())
    }

    async fn poll_activity_task(&self) -> Result<ActivityTask, BridgeError> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(task) = state.act_queue.pop_front() {
                    if let ActivityTaskVariant::Start(_) = &task.variant {
                        let token = u64::from_be_bytes(
                            task.task_token[..8].try_into().expect("8-byte token"),
                        );
                        if let Some(pending) = state.activities.get_mut(&token) {
                            pending.claimed = true;
                        }
                    }
                    return Ok(task);
                }
                if state.shutdown {
                    return Err(BridgeError::ShutDown);
                }
            }
            self.act_notify.notified().await;
        }
    }

    async fn complete_activity_task(
        &self,
        completion: ActivityTaskCompletion,
    ) -> Result<(), BridgeError> {
        self.process_activity_completion(completion);
        Ok(())
    }

    async fn record_activity_heartbeat(
        &self,
        heartbeat: ActivityHeartbeat,
    ) -> Result<(), BridgeError> {
        // Slow flush so coalescing between flushes is observable in tests
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.state.lock().heartbeats.push(heartbeat);
        Ok(())
    }

    async fn initiate_shutdown(&self) {
        self.shutdown();
    }
}

fn latest_run(state: &SimState, workflow_id: &str) -> String {
    state
        .chains
        .get(workflow_id)
        .and_then(|runs| runs.last())
        .cloned()
        .unwrap_or_else(|| panic!("no runs for workflow {workflow_id}"))
}

fn json_payload(value: &serde_json::Value) -> Payload {
    Payload::with_encoding("json/plain", serde_json::to_vec(value).expect("valid json"))
}

fn started_attributes(
    workflow_type: &str,
    input: Vec<Payload>,
    seed: u64,
) -> WorkflowExecutionStartedAttributes {
    WorkflowExecutionStartedAttributes {
        workflow_type: workflow_type.to_string(),
        task_queue: "test-queue".to_string(),
        input,
        headers: Headers::default(),
        attempt: 1,
        randomness_seed: seed,
        workflow_execution_timeout: None,
        workflow_run_timeout: None,
        workflow_task_timeout: None,
        retry_policy: None,
        cron_schedule: None,
        continued_execution_run_id: None,
        parent: None,
        memo: Default::default(),
        search_attributes: Default::default(),
        last_failure: None,
    }
}

fn start_task(token: u64, run_id: &str, cmd: &ScheduleActivityCmd, attempt: u32) -> ActivityTask {
    ActivityTask {
        task_token: token.to_be_bytes().to_vec(),
        variant: ActivityTaskVariant::Start(ActivityStart {
            activity_id: cmd.activity_id.clone(),
            activity_type: cmd.activity_type.clone(),
            workflow_execution: WorkflowExecution::new("wf", run_id),
            workflow_type: "test".to_string(),
            workflow_namespace: "default".to_string(),
            task_queue: cmd.task_queue.clone(),
            headers: cmd.headers.clone(),
            input: cmd.input.clone(),
            heartbeat_details: vec![],
            scheduled_time: Utc::now(),
            current_attempt_scheduled_time: Utc::now(),
            started_time: Utc::now(),
            attempt,
            schedule_to_close_timeout: cmd.schedule_to_close_timeout,
            start_to_close_timeout: cmd.start_to_close_timeout,
            heartbeat_timeout: cmd.heartbeat_timeout,
            retry_policy: cmd.retry_policy.clone(),
            is_local: false,
        }),
    }
}

fn should_retry(policy: &Option<RetryPolicy>, attempt: u32, failure: &TemporalFailure) -> bool {
    let Some(policy) = policy else { return false };
    if policy.maximum_attempts != 0 && attempt >= policy.maximum_attempts {
        return false;
    }
    if let FailureInfo::Application {
        non_retryable,
        error_type,
        ..
    } = &failure.info
    {
        if *non_retryable {
            return false;
        }
        if policy.non_retryable_error_types.contains(error_type) {
            return false;
        }
    }
    true
}
