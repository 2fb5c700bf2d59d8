//! Activity worker
//!
//! Polls activity tasks from the bridge, runs registered handlers as
//! ordinary concurrent tokio tasks, and reports results. Each running
//! activity is tracked by task token; cancellation is cooperative and
//! carries a recorded reason.

mod context;

pub use context::{ActivityCancellationReason, ActivityContext};

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use tempo_core::bridge::{ActivityCancelReason, ActivityExecutionResult, ActivityHeartbeat,
    ActivityStart, ActivityTask, ActivityTaskCompletion, ActivityTaskVariant, BridgeError,
    CoreBridge};
use tempo_core::common::ActivityInfo;
use tempo_core::failure::TemporalFailure;
use tempo_core::payload::Payload;
use tempo_convert::DataConverter;

use crate::error::{ActivityError, WorkerError};
use crate::interceptors::{
    build_activity_chain, build_heartbeat_chain, ActivityInboundInterceptor,
    ActivityOutboundInterceptor, ExecuteActivityInput, RecordHeartbeatInput, WorkerInterceptor,
};
use crate::registry::{ActivityHandlerFn, Registry};

/// State of one tracked activity
#[derive(Debug, Clone)]
enum RunState {
    Running,
    Cancelled,
    Finished,
}

/// A tracked running activity, exclusively owned by its task token
pub(crate) struct RunningActivity {
    cancel_tx: watch::Sender<Option<ActivityCancellationReason>>,
    state: RunState,
}

impl RunningActivity {
    fn new(cancel_tx: watch::Sender<Option<ActivityCancellationReason>>) -> Self {
        Self {
            cancel_tx,
            state: RunState::Running,
        }
    }

    /// Cancel with the given reason. Cancelling an already-cancelled or
    /// finished activity is a programming error and traps.
    pub(crate) fn cancel(&mut self, reason: ActivityCancellationReason) {
        match self.state {
            RunState::Running => {
                self.state = RunState::Cancelled;
                let _ = self.cancel_tx.send(Some(reason));
            }
            RunState::Cancelled => {
                panic!("activity cancelled twice; duplicate cancellation is a programming error")
            }
            RunState::Finished => {
                panic!("cancel called on a finished activity")
            }
        }
    }

    /// Mark the activity finished; later cancels trap
    pub(crate) fn mark_finished(&mut self) {
        self.state = RunState::Finished;
    }

    /// Cancel only if still running; used by paths where a duplicate is an
    /// expected race (heartbeat failure, worker shutdown), not a bug
    fn cancel_if_running(&mut self, reason: ActivityCancellationReason) -> bool {
        if matches!(self.state, RunState::Running) {
            self.state = RunState::Cancelled;
            let _ = self.cancel_tx.send(Some(reason));
            true
        } else {
            false
        }
    }
}

/// Terminal of the heartbeat outbound chain: single-slot latest-wins buffer
struct HeartbeatSink {
    tx: watch::Sender<Option<Vec<serde_json::Value>>>,
}

impl ActivityOutboundInterceptor for HeartbeatSink {
    fn record_heartbeat(&self, input: RecordHeartbeatInput) {
        // Overwrites any unsent details; the sender task flushes the latest
        let _ = self.tx.send(Some(input.details));
    }
}

/// Terminal of the inbound chain: invokes the registered handler
struct HandlerTerminal {
    handler: ActivityHandlerFn,
    ctx: ActivityContext,
    converter: Arc<DataConverter>,
}

#[async_trait]
impl ActivityInboundInterceptor for HandlerTerminal {
    async fn execute_activity(
        &self,
        input: ExecuteActivityInput,
    ) -> Result<Option<Payload>, ActivityError> {
        (self.handler)(self.ctx.clone(), input.input, self.converter.clone()).await
    }
}

/// Polls and executes activity tasks
pub(crate) struct ActivityWorker {
    bridge: Arc<dyn CoreBridge>,
    registry: Arc<Registry>,
    converter: Arc<DataConverter>,
    providers: Arc<Vec<Arc<dyn WorkerInterceptor>>>,
    running: Arc<DashMap<Vec<u8>, RunningActivity>>,
    concurrency: Arc<Semaphore>,
}

impl ActivityWorker {
    pub(crate) fn new(
        bridge: Arc<dyn CoreBridge>,
        registry: Arc<Registry>,
        converter: Arc<DataConverter>,
        providers: Arc<Vec<Arc<dyn WorkerInterceptor>>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            bridge,
            registry,
            converter,
            providers,
            running: Arc::new(DashMap::new()),
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Poll until the bridge reports shutdown, then drain in-flight tasks
    #[instrument(skip(self))]
    pub(crate) async fn run(self: Arc<Self>) -> Result<(), WorkerError> {
        let mut tasks = JoinSet::new();

        let result = loop {
            // Reap finished tasks without blocking the poll
            while tasks.try_join_next().is_some() {}

            let task = match self.bridge.poll_activity_task().await {
                Ok(task) => task,
                Err(BridgeError::ShutDown) => break Ok(()),
                Err(e) => break Err(WorkerError::from(e)),
            };

            match task.variant {
                ActivityTaskVariant::Start(start) => {
                    let permit = match self.concurrency.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break Ok(()),
                    };
                    let worker = self.clone();
                    let token = task.task_token;
                    tasks.spawn(async move {
                        worker.execute(token, start).await;
                        drop(permit);
                    });
                }
                ActivityTaskVariant::Cancel { reason } => {
                    self.handle_cancel(&task.task_token, reason);
                }
            }
        };

        // In-flight activities finish (or observe shutdown cancellation)
        // before run() returns
        info!("activity poller draining in-flight tasks");
        while tasks.join_next().await.is_some() {}
        result
    }

    /// Cancel every running activity with the worker-shutdown reason
    pub(crate) fn cancel_all_for_shutdown(&self) {
        for mut entry in self.running.iter_mut() {
            entry
                .value_mut()
                .cancel_if_running(ActivityCancellationReason::WorkerShutdown);
        }
    }

    fn handle_cancel(&self, task_token: &[u8], reason: ActivityCancelReason) {
        let reason = match reason {
            ActivityCancelReason::NotFound => ActivityCancellationReason::GoneFromServer,
            ActivityCancelReason::Cancelled => ActivityCancellationReason::ServerRequest,
            ActivityCancelReason::TimedOut => ActivityCancellationReason::Timeout,
            ActivityCancelReason::WorkerShutdown => ActivityCancellationReason::WorkerShutdown,
        };
        match self.running.get_mut(task_token) {
            Some(mut entry) => entry.value_mut().cancel(reason),
            None => {
                warn!("cancel received for activity not running on this worker");
            }
        }
    }

    #[instrument(skip(self, start), fields(activity_type = %start.activity_type, activity_id = %start.activity_id))]
    async fn execute(&self, task_token: Vec<u8>, start: ActivityStart) {
        let Some(registration) = self.registry.activity(&start.activity_type) else {
            let message = format!(
                "activity type '{}' is not registered on this worker, known types: [{}]",
                start.activity_type,
                self.registry.activity_names().join(", ")
            );
            warn!("{message}");
            let failure = TemporalFailure::application(message, "NotFoundError").non_retryable();
            self.complete(task_token, ActivityExecutionResult::Failed { failure })
                .await;
            return;
        };

        let info = Arc::new(activity_info(&task_token, &start));

        // Heartbeat plumbing: outbound chain into a latest-wins slot, plus a
        // dedicated sender task that converts and flushes
        let (heartbeat_tx, heartbeat_rx) = watch::channel(None);
        let heartbeat_chain = build_heartbeat_chain(
            &self.providers,
            Arc::new(HeartbeatSink { tx: heartbeat_tx }),
        );

        let (cancel_tx, cancel_rx) = watch::channel(None);
        self.running
            .insert(task_token.clone(), RunningActivity::new(cancel_tx));

        let ctx = ActivityContext::new(info, heartbeat_chain, cancel_rx);

        let sender = heartbeat_sender(
            heartbeat_rx,
            self.bridge.clone(),
            self.converter.clone(),
            self.running.clone(),
            task_token.clone(),
        );
        let sender_task = tokio::spawn(sender);

        let headers = match self.converter.decode_headers(start.headers.clone()) {
            Ok(headers) => headers,
            Err(e) => {
                self.running.remove(&task_token);
                sender_task.abort();
                let failure = TemporalFailure::application(
                    format!("failed to decode activity headers: {e}"),
                    "DataConverterError",
                )
                .non_retryable();
                self.complete(task_token, ActivityExecutionResult::Failed { failure })
                    .await;
                return;
            }
        };

        let chain = build_activity_chain(
            &self.providers,
            Arc::new(HandlerTerminal {
                handler: registration.handler.clone(),
                ctx: ctx.clone(),
                converter: self.converter.clone(),
            }),
        );

        let input = ExecuteActivityInput {
            activity_type: start.activity_type.clone(),
            headers,
            input: start.input.clone(),
        };

        let outcome = ctx.scope(chain.execute_activity(input)).await;

        if let Some((_, mut finished)) = self.running.remove(&task_token) {
            finished.mark_finished();
        }
        sender_task.abort();

        let result = translate_outcome(outcome, &ctx, &self.converter);
        self.complete(task_token, result).await;
    }

    async fn complete(&self, task_token: Vec<u8>, result: ActivityExecutionResult) {
        debug!("reporting activity completion");
        let completion = ActivityTaskCompletion { task_token, result };
        if let Err(e) = self.bridge.complete_activity_task(completion).await {
            warn!(error = %e, "failed to report activity completion");
        }
    }
}

/// Map a handler outcome onto the wire result, honoring the
/// cancelled-error translation rule and its heartbeat-failure exception
fn translate_outcome(
    outcome: Result<Option<Payload>, ActivityError>,
    ctx: &ActivityContext,
    converter: &DataConverter,
) -> ActivityExecutionResult {
    match outcome {
        Ok(result) => ActivityExecutionResult::Completed { result },
        Err(ActivityError::CompleteAsync) => ActivityExecutionResult::WillCompleteAsync,
        Err(error) => match ctx.cancellation_reason() {
            Some(ActivityCancellationReason::HeartbeatRecordFailure(source)) => {
                let failure = TemporalFailure::application(
                    format!("heartbeat details conversion failed: {source}"),
                    "DataConverterError",
                )
                .non_retryable();
                ActivityExecutionResult::Failed { failure }
            }
            Some(_) => ActivityExecutionResult::Cancelled {
                failure: TemporalFailure::cancelled("activity cancelled"),
            },
            None => {
                let failure = encode_failure(error.into_failure(converter), converter);
                ActivityExecutionResult::Failed { failure }
            }
        },
    }
}

fn encode_failure(failure: TemporalFailure, converter: &DataConverter) -> TemporalFailure {
    match converter.failure_to_wire(failure) {
        Ok(f) => f,
        Err(e) => TemporalFailure::application(
            format!("failure conversion failed: {e}"),
            "DataConverterError",
        ),
    }
}

fn activity_info(task_token: &[u8], start: &ActivityStart) -> ActivityInfo {
    ActivityInfo {
        activity_id: start.activity_id.clone(),
        activity_type: start.activity_type.clone(),
        attempt: start.attempt,
        scheduled_time: start.scheduled_time,
        started_time: start.started_time,
        current_attempt_scheduled_time: start.current_attempt_scheduled_time,
        heartbeat_timeout: start.heartbeat_timeout,
        schedule_to_close_timeout: start.schedule_to_close_timeout,
        start_to_close_timeout: start.start_to_close_timeout,
        is_local: start.is_local,
        task_queue: start.task_queue.clone(),
        task_token: task_token.to_vec(),
        workflow_id: start.workflow_execution.workflow_id.clone(),
        workflow_run_id: start.workflow_execution.run_id.clone(),
        workflow_type: start.workflow_type.clone(),
        workflow_namespace: start.workflow_namespace.clone(),
        heartbeat_details: start.heartbeat_details.clone(),
    }
}

/// Drains the latest-wins heartbeat slot, converts details through the
/// pipeline, and records them through the bridge. A conversion failure
/// cancels the activity with the heartbeat-record-failure reason.
async fn heartbeat_sender(
    mut rx: watch::Receiver<Option<Vec<serde_json::Value>>>,
    bridge: Arc<dyn CoreBridge>,
    converter: Arc<DataConverter>,
    running: Arc<DashMap<Vec<u8>, RunningActivity>>,
    task_token: Vec<u8>,
) {
    while rx.changed().await.is_ok() {
        let details = rx.borrow_and_update().clone();
        let Some(details) = details else { continue };

        let mut payloads = Vec::with_capacity(details.len());
        let mut conversion_error = None;
        for value in &details {
            match converter.to_payload(value) {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    conversion_error = Some(e);
                    break;
                }
            }
        }

        if let Some(error) = conversion_error {
            warn!(error = %error, "heartbeat details conversion failed, cancelling activity");
            if let Some(mut entry) = running.get_mut(&task_token) {
                entry.value_mut().cancel_if_running(
                    ActivityCancellationReason::HeartbeatRecordFailure(Arc::new(error)),
                );
            }
            return;
        }

        let heartbeat = ActivityHeartbeat {
            task_token: task_token.clone(),
            details: payloads,
        };
        if let Err(e) = bridge.record_activity_heartbeat(heartbeat).await {
            match e {
                BridgeError::ShutDown => return,
                other => warn!(error = %other, "failed to record heartbeat"),
            }
        }
    }
}
