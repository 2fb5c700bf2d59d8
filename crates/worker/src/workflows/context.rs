//! The per-run workflow context
//!
//! `WfContext` is the only gateway workflow code has to time, randomness,
//! and the outside world. Every primitive appends a command to the run's
//! buffer and suspends on a typed resolution; none of them performs I/O.
//! The engine installs the context around each resumption, so state observed
//! here is identical on replay.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use tempo_core::bridge::{ActivityResolution, ChildWorkflowResolution, StartChildResolution};
use tempo_core::command::{ContinueAsNewCmd, ScheduleActivityCmd, StartChildWorkflowCmd,
    WorkflowCommand};
use tempo_core::common::{WorkflowExecution, WorkflowInfo};
use tempo_core::failure::TemporalFailure;
use tempo_core::history::StartChildFailedCause;
use tempo_core::payload::{Headers, Memo, Payload};
use tempo_core::retry::RetryPolicy;
use tempo_core::search::SearchAttributeValue;
use tempo_convert::DataConverter;

use crate::error::WorkflowError;

/// Shared handle to the workflow's state struct
///
/// The mutex is only ever contended within one cooperative scheduler, and no
/// lock is held across a suspension point: `with` runs a synchronous closure
/// and releases before returning.
pub struct WorkflowState<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for WorkflowState<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W> WorkflowState<W> {
    pub(crate) fn from_arc(inner: Arc<Mutex<W>>) -> Self {
        Self { inner }
    }

    /// Run a closure against the state
    pub fn with<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

/// Outcome delivered to a suspended timer
#[derive(Debug)]
pub(crate) enum TimerOutcome {
    Fired,
    Cancelled(TemporalFailure),
}

/// Messages from context primitives to the run's command buffer
pub(crate) enum EngineMsg {
    Timer {
        cmd: WorkflowCommand,
        seq: u32,
        done: oneshot::Sender<TimerOutcome>,
    },
    CancelTimer {
        seq: u32,
    },
    Activity {
        cmd: WorkflowCommand,
        seq: u32,
        done: oneshot::Sender<ActivityResolution>,
    },
    CancelActivity {
        seq: u32,
    },
    ChildStart {
        cmd: WorkflowCommand,
        seq: u32,
        done: oneshot::Sender<StartChildResolution>,
    },
    AwaitChild {
        seq: u32,
        done: oneshot::Sender<ChildWorkflowResolution>,
    },
    CancelChild {
        seq: u32,
    },
    ExternalSignal {
        cmd: WorkflowCommand,
        seq: u32,
        done: oneshot::Sender<Option<TemporalFailure>>,
    },
    Command(WorkflowCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConditionState {
    Pending,
    Ready,
    Cancelled,
}

/// A registered condition: predicate plus readiness flag
pub(crate) struct ConditionCell {
    pub(crate) predicate: Box<dyn Fn() -> bool + Send + Sync>,
    pub(crate) state: Mutex<ConditionState>,
}

/// Mutable per-run state owned by the engine and read through the context
pub(crate) struct RunCore {
    pub(crate) info: WorkflowInfo,
    pub(crate) now: DateTime<Utc>,
    pub(crate) random: StdRng,
    pub(crate) is_replaying: bool,
    pub(crate) cancelled: bool,
    pub(crate) current_details: Option<String>,
    pub(crate) search_attributes: HashMap<String, SearchAttributeValue>,
    pub(crate) conditions: Vec<Arc<ConditionCell>>,
    next_timer_seq: u32,
    next_activity_seq: u32,
    next_child_seq: u32,
    next_external_seq: u32,
}

impl RunCore {
    pub(crate) fn new(info: WorkflowInfo, start_time: DateTime<Utc>, seed: u64) -> Self {
        Self {
            info,
            now: start_time,
            random: StdRng::seed_from_u64(seed),
            is_replaying: false,
            cancelled: false,
            current_details: None,
            search_attributes: HashMap::new(),
            conditions: Vec::new(),
            next_timer_seq: 0,
            next_activity_seq: 0,
            next_child_seq: 0,
            next_external_seq: 0,
        }
    }

    fn next_timer_seq(&mut self) -> u32 {
        self.next_timer_seq += 1;
        self.next_timer_seq
    }

    fn next_activity_seq(&mut self) -> u32 {
        self.next_activity_seq += 1;
        self.next_activity_seq
    }

    fn next_child_seq(&mut self) -> u32 {
        self.next_child_seq += 1;
        self.next_child_seq
    }

    fn next_external_seq(&mut self) -> u32 {
        self.next_external_seq += 1;
        self.next_external_seq
    }
}

/// Options for scheduling an activity from workflow code
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Registered activity type name
    pub activity_type: String,

    /// Task queue override; defaults to the workflow's own queue
    pub task_queue: Option<String>,

    /// Activity id override; defaults to the command sequence number
    pub activity_id: Option<String>,

    pub schedule_to_close_timeout: Option<Duration>,
    pub schedule_to_start_timeout: Option<Duration>,
    pub start_to_close_timeout: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
    pub headers: Headers,
}

impl ActivityOptions {
    /// Options with a start-to-close timeout, the minimum viable schedule
    pub fn new(activity_type: impl Into<String>, start_to_close: Duration) -> Self {
        Self {
            activity_type: activity_type.into(),
            task_queue: None,
            activity_id: None,
            schedule_to_close_timeout: None,
            schedule_to_start_timeout: None,
            start_to_close_timeout: Some(start_to_close),
            heartbeat_timeout: None,
            retry_policy: None,
            headers: Headers::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_schedule_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }
}

/// Options for starting a child workflow
#[derive(Debug, Clone)]
pub struct ChildWorkflowOptions {
    pub workflow_type: String,
    /// Child workflow id; defaults to `<parent-id>/<seq>`
    pub workflow_id: Option<String>,
    pub task_queue: Option<String>,
    pub namespace: Option<String>,
    pub execution_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub task_timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
    pub memo: Memo,
    pub cron_schedule: Option<String>,
    pub headers: Headers,
}

impl ChildWorkflowOptions {
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            workflow_id: None,
            task_queue: None,
            namespace: None,
            execution_timeout: None,
            run_timeout: None,
            task_timeout: None,
            retry_policy: None,
            memo: Memo::default(),
            cron_schedule: None,
            headers: Headers::default(),
        }
    }

    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }
}

/// The ambient workflow API, installed per task by the engine
#[derive(Clone)]
pub struct WfContext {
    pub(crate) core: Arc<Mutex<RunCore>>,
    pub(crate) sender: mpsc::UnboundedSender<EngineMsg>,
    pub(crate) converter: Arc<DataConverter>,
}

impl WfContext {
    pub(crate) fn new(
        core: Arc<Mutex<RunCore>>,
        sender: mpsc::UnboundedSender<EngineMsg>,
        converter: Arc<DataConverter>,
    ) -> Self {
        Self {
            core,
            sender,
            converter,
        }
    }

    /// The data converter shared by this worker
    pub fn converter(&self) -> Arc<DataConverter> {
        self.converter.clone()
    }

    /// Read-only info about the current run
    pub fn workflow_info(&self) -> WorkflowInfo {
        self.core.lock().info.clone()
    }

    /// The workflow's deterministic clock; advanced only by activations
    pub fn now(&self) -> DateTime<Utc> {
        self.core.lock().now
    }

    /// Whether this code is currently replaying a known history prefix
    pub fn is_replaying(&self) -> bool {
        self.core.lock().is_replaying
    }

    /// Whether cancellation of the run has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.core.lock().cancelled
    }

    /// Deterministic random u64
    pub fn random_u64(&self) -> u64 {
        self.core.lock().random.gen()
    }

    /// Deterministic random value in a range
    pub fn random_range(&self, range: std::ops::Range<u64>) -> u64 {
        self.core.lock().random.gen_range(range)
    }

    /// Deterministic v4 UUID drawn from the workflow RNG
    pub fn uuid4(&self) -> Uuid {
        let bytes: [u8; 16] = self.core.lock().random.gen();
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    /// The workflow-local details string served by the metadata query
    pub fn current_details(&self) -> Option<String> {
        self.core.lock().current_details.clone()
    }

    /// Replace the workflow-local details string (not persisted in history)
    pub fn set_current_details(&self, details: impl Into<String>) {
        self.core.lock().current_details = Some(details.into());
    }

    /// Start a timer; the future resolves when it fires and cancels the
    /// timer if dropped first
    pub fn sleep(&self, duration: Duration) -> TimerFuture {
        self.sleep_with_summary(duration, None)
    }

    /// [`WfContext::sleep`] with a human-readable summary on the command
    pub fn sleep_with_summary(&self, duration: Duration, summary: Option<String>) -> TimerFuture {
        let seq = self.core.lock().next_timer_seq();
        let (done, rx) = oneshot::channel();
        let cmd = WorkflowCommand::StartTimer {
            seq,
            duration,
            summary,
        };
        let _ = self.sender.send(EngineMsg::Timer { cmd, seq, done });
        TimerFuture {
            seq,
            rx,
            sender: self.sender.clone(),
            finished: false,
        }
    }

    /// Suspend until the predicate returns true
    ///
    /// The predicate is re-evaluated after every scheduler step that may
    /// have mutated workflow state. It must be a pure read of workflow
    /// state: no context calls, no side effects.
    pub fn condition(&self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> ConditionFuture {
        let cell = Arc::new(ConditionCell {
            predicate: Box::new(predicate),
            state: Mutex::new(ConditionState::Pending),
        });
        self.core.lock().conditions.push(cell.clone());
        ConditionFuture { cell }
    }

    /// Race `body` against a timer
    ///
    /// On timeout the body is dropped (cancelling its pending primitives)
    /// and a cancelled error is returned; if the body finishes first the
    /// timer is cancelled silently. Errors from the body propagate unchanged.
    pub async fn timeout<F: Future>(
        &self,
        duration: Duration,
        body: F,
    ) -> Result<F::Output, WorkflowError> {
        let timer = self.sleep_with_summary(duration, Some("timeout".to_string()));
        futures::pin_mut!(body);
        futures::pin_mut!(timer);

        futures::future::poll_fn(move |cx| {
            // Body polled first so it wins ties deterministically
            if let Poll::Ready(output) = body.as_mut().poll(cx) {
                return Poll::Ready(Ok(output));
            }
            match timer.as_mut().poll(cx) {
                Poll::Ready(Ok(())) => {
                    Poll::Ready(Err(WorkflowError::cancelled("timeout elapsed")))
                }
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Pending => Poll::Pending,
            }
        })
        .await
    }

    /// Schedule an activity and suspend until it resolves, decoding the
    /// result into `O`
    pub async fn execute_activity<I, O>(
        &self,
        options: ActivityOptions,
        input: &I,
    ) -> Result<O, WorkflowError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let payload = self
            .converter
            .to_payload(input)
            .map_err(WorkflowError::from_convert)?;
        let result = self.start_activity(options, vec![payload])?.await?;
        self.converter
            .from_optional_payload(result.as_ref())
            .map_err(WorkflowError::from_convert)
    }

    /// Schedule an activity with pre-encoded input
    pub fn start_activity(
        &self,
        options: ActivityOptions,
        input: Vec<Payload>,
    ) -> Result<ActivityFuture, WorkflowError> {
        if options.start_to_close_timeout.is_none() && options.schedule_to_close_timeout.is_none()
        {
            return Err(WorkflowError::application(
                "activity options require a start_to_close or schedule_to_close timeout",
                "ArgumentError",
            ));
        }
        if let Some(policy) = &options.retry_policy {
            policy
                .validate()
                .map_err(|e| WorkflowError::application(e.to_string(), "ArgumentError"))?;
        }

        let (seq, task_queue) = {
            let mut core = self.core.lock();
            let seq = core.next_activity_seq();
            let queue = options
                .task_queue
                .clone()
                .unwrap_or_else(|| core.info.task_queue.clone());
            (seq, queue)
        };

        let cmd = WorkflowCommand::ScheduleActivity(ScheduleActivityCmd {
            seq,
            activity_id: options
                .activity_id
                .clone()
                .unwrap_or_else(|| seq.to_string()),
            activity_type: options.activity_type.clone(),
            task_queue,
            input,
            headers: options.headers.clone(),
            retry_policy: options.retry_policy.clone(),
            schedule_to_close_timeout: options.schedule_to_close_timeout,
            schedule_to_start_timeout: options.schedule_to_start_timeout,
            start_to_close_timeout: options.start_to_close_timeout,
            heartbeat_timeout: options.heartbeat_timeout,
        });

        let (done, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMsg::Activity { cmd, seq, done });
        Ok(ActivityFuture {
            seq,
            rx,
            sender: self.sender.clone(),
            finished: false,
        })
    }

    /// Start a child workflow; suspends until the start resolves
    pub async fn start_child_workflow<I: Serialize>(
        &self,
        options: ChildWorkflowOptions,
        input: &I,
    ) -> Result<ChildWorkflowHandle, WorkflowError> {
        let payload = self
            .converter
            .to_payload(input)
            .map_err(WorkflowError::from_convert)?;

        let (seq, workflow_id, namespace, task_queue) = {
            let mut core = self.core.lock();
            let seq = core.next_child_seq();
            let id = options
                .workflow_id
                .clone()
                .unwrap_or_else(|| format!("{}/{}", core.info.workflow_id, seq));
            let namespace = options
                .namespace
                .clone()
                .unwrap_or_else(|| core.info.namespace.clone());
            let queue = options
                .task_queue
                .clone()
                .unwrap_or_else(|| core.info.task_queue.clone());
            (seq, id, namespace, queue)
        };

        let cmd = WorkflowCommand::StartChildWorkflow(StartChildWorkflowCmd {
            seq,
            namespace,
            workflow_id: workflow_id.clone(),
            workflow_type: options.workflow_type.clone(),
            task_queue,
            input: vec![payload],
            headers: options.headers.clone(),
            retry_policy: options.retry_policy.clone(),
            execution_timeout: options.execution_timeout,
            run_timeout: options.run_timeout,
            task_timeout: options.task_timeout,
            memo: options.memo.clone(),
            cron_schedule: options.cron_schedule.clone(),
        });

        let (done, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMsg::ChildStart { cmd, seq, done });

        let start = StartChildFuture {
            seq,
            rx,
            sender: self.sender.clone(),
            finished: false,
        };

        match start.await? {
            StartChildResolution::Succeeded { run_id } => Ok(ChildWorkflowHandle {
                seq,
                workflow_id,
                run_id,
                sender: self.sender.clone(),
            }),
            StartChildResolution::Failed {
                workflow_id,
                workflow_type,
                cause,
            } => {
                let message = match cause {
                    StartChildFailedCause::WorkflowAlreadyExists => format!(
                        "child workflow {workflow_id} ({workflow_type}) already exists"
                    ),
                    StartChildFailedCause::NamespaceNotFound => format!(
                        "namespace not found starting child workflow {workflow_id}"
                    ),
                };
                Err(WorkflowError::application(
                    message,
                    "ChildWorkflowError",
                ))
            }
            StartChildResolution::Cancelled { failure } => {
                Err(WorkflowError::Cancelled(failure))
            }
        }
    }

    /// Start a child workflow and await its result in one call
    pub async fn execute_child_workflow<I, O>(
        &self,
        options: ChildWorkflowOptions,
        input: &I,
    ) -> Result<O, WorkflowError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let handle = self.start_child_workflow(options, input).await?;
        handle.result(self.converter.clone()).await
    }

    /// Signal another workflow execution; resolves once the cluster delivers
    /// or rejects the signal
    pub async fn signal_external_workflow<I: Serialize>(
        &self,
        execution: WorkflowExecution,
        signal_name: impl Into<String>,
        input: &I,
    ) -> Result<(), WorkflowError> {
        let payload = self
            .converter
            .to_payload(input)
            .map_err(WorkflowError::from_convert)?;
        let seq = self.core.lock().next_external_seq();

        let cmd = WorkflowCommand::SignalExternalWorkflow {
            seq,
            execution,
            signal_name: signal_name.into(),
            input: vec![payload],
            headers: Headers::default(),
        };

        let (done, rx) = oneshot::channel();
        let _ = self
            .sender
            .send(EngineMsg::ExternalSignal { cmd, seq, done });

        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(failure)) => Err(WorkflowError::Failure(failure)),
            // Run torn down while suspended
            Err(_) => std::future::pending().await,
        }
    }

    /// Request cancellation of another workflow execution (fire and forget)
    pub fn cancel_external_workflow(&self, execution: WorkflowExecution) {
        let seq = self.core.lock().next_external_seq();
        let _ = self
            .sender
            .send(EngineMsg::Command(WorkflowCommand::CancelExternalWorkflow {
                seq,
                execution,
            }));
    }

    /// Upsert typed search attributes on this execution
    pub fn upsert_search_attributes(&self, attributes: HashMap<String, SearchAttributeValue>) {
        {
            let mut core = self.core.lock();
            for (k, v) in &attributes {
                core.search_attributes.insert(k.clone(), v.clone());
            }
        }
        let _ = self
            .sender
            .send(EngineMsg::Command(WorkflowCommand::UpsertSearchAttributes {
                attributes,
            }));
    }

    /// Produce the continue-as-new sentinel error
    ///
    /// Return it from the run function to close this run as
    /// continued-as-new with the given input.
    pub fn continue_as_new<I: Serialize>(&self, input: &I) -> WorkflowError {
        let payload = match self.converter.to_payload(input) {
            Ok(p) => p,
            Err(e) => return WorkflowError::from_convert(e),
        };
        let core = self.core.lock();
        WorkflowError::ContinueAsNew(Box::new(ContinueAsNewCmd {
            workflow_type: core.info.workflow_type.clone(),
            task_queue: core.info.task_queue.clone(),
            input: vec![payload],
            headers: Headers::default(),
            retry_policy: core.info.retry_policy.clone(),
            run_timeout: core.info.run_timeout,
            task_timeout: core.info.task_timeout,
            memo: Memo::default(),
        }))
    }
}

/// A pending timer; cancels itself when dropped unfired
pub struct TimerFuture {
    seq: u32,
    rx: oneshot::Receiver<TimerOutcome>,
    sender: mpsc::UnboundedSender<EngineMsg>,
    finished: bool,
}

impl Future for TimerFuture {
    type Output = Result<(), WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(TimerOutcome::Fired)) => {
                self.finished = true;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Ok(TimerOutcome::Cancelled(failure))) => {
                self.finished = true;
                Poll::Ready(Err(WorkflowError::Cancelled(failure)))
            }
            // The run is being torn down; stay suspended until dropped
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TimerFuture {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.sender.send(EngineMsg::CancelTimer { seq: self.seq });
        }
    }
}

/// A pending activity; requests cancellation when dropped unresolved
pub struct ActivityFuture {
    seq: u32,
    rx: oneshot::Receiver<ActivityResolution>,
    sender: mpsc::UnboundedSender<EngineMsg>,
    finished: bool,
}

impl Future for ActivityFuture {
    type Output = Result<Option<Payload>, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(resolution)) => {
                self.finished = true;
                let outcome = match resolution {
                    ActivityResolution::Completed { result } => Ok(result),
                    ActivityResolution::Failed { failure } => {
                        Err(WorkflowError::Failure(failure))
                    }
                    ActivityResolution::Cancelled { failure } => {
                        Err(WorkflowError::Cancelled(failure))
                    }
                };
                Poll::Ready(outcome)
            }
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ActivityFuture {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self
                .sender
                .send(EngineMsg::CancelActivity { seq: self.seq });
        }
    }
}

/// A pending child-workflow start
struct StartChildFuture {
    seq: u32,
    rx: oneshot::Receiver<StartChildResolution>,
    sender: mpsc::UnboundedSender<EngineMsg>,
    finished: bool,
}

impl Future for StartChildFuture {
    type Output = Result<StartChildResolution, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(resolution)) => {
                self.finished = true;
                Poll::Ready(Ok(resolution))
            }
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StartChildFuture {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.sender.send(EngineMsg::CancelChild { seq: self.seq });
        }
    }
}

/// Handle to a started child workflow
pub struct ChildWorkflowHandle {
    seq: u32,
    workflow_id: String,
    run_id: String,
    sender: mpsc::UnboundedSender<EngineMsg>,
}

impl ChildWorkflowHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation of the child
    pub fn cancel(&self) {
        let _ = self.sender.send(EngineMsg::CancelChild { seq: self.seq });
    }

    /// Suspend until the child reaches a terminal state
    pub async fn result<O: DeserializeOwned>(
        &self,
        converter: Arc<DataConverter>,
    ) -> Result<O, WorkflowError> {
        let (done, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMsg::AwaitChild {
            seq: self.seq,
            done,
        });

        match rx.await {
            Ok(ChildWorkflowResolution::Completed { result }) => converter
                .from_optional_payload(result.as_ref())
                .map_err(WorkflowError::from_convert),
            Ok(ChildWorkflowResolution::Failed { failure }) => {
                Err(WorkflowError::Failure(failure))
            }
            Ok(ChildWorkflowResolution::Cancelled { failure }) => {
                Err(WorkflowError::Cancelled(failure))
            }
            Err(_) => std::future::pending().await,
        }
    }
}

/// A pending condition
pub struct ConditionFuture {
    cell: Arc<ConditionCell>,
}

impl Future for ConditionFuture {
    type Output = Result<(), WorkflowError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = *self.cell.state.lock();
        match state {
            // First poll may observe an already-true predicate
            ConditionState::Pending => {
                if (self.cell.predicate)() {
                    *self.cell.state.lock() = ConditionState::Ready;
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            }
            ConditionState::Ready => Poll::Ready(Ok(())),
            ConditionState::Cancelled => Poll::Ready(Err(WorkflowError::cancelled(
                "workflow cancellation requested",
            ))),
        }
    }
}
