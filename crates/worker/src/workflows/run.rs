//! Per-run deterministic engine
//!
//! One `WorkflowRun` exists per cached run. `activate` is synchronous: it
//! applies an activation's jobs, drives the cooperative scheduler to
//! quiescence, and returns the command batch. Suspension happens only at
//! context primitives; parallelism within an activation is simulated by
//! polling the root and handler futures in a fixed order with a no-op waker.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tempo_core::bridge::{ActivationJob, ActivityResolution, ChildWorkflowResolution,
    StartChildResolution, WorkflowActivation};
use tempo_core::command::{QueryResult, UpdateResponseOutcome, WorkflowCommand};
use tempo_core::common::WorkflowInfo;
use tempo_core::failure::TemporalFailure;
use tempo_core::history::{WorkflowExecutionStartedAttributes, WorkflowTaskFailedCause};
use tempo_core::payload::{Headers, Payload};
use tempo_core::METADATA_QUERY_NAME;
use tempo_convert::DataConverter;

use crate::error::WorkflowError;
use crate::interceptors::{
    build_workflow_chain, ExecuteWorkflowInput, HandleQueryInput, HandleSignalInput,
    HandleUpdateInput, WorkerInterceptor, WorkflowInboundInterceptor,
};
use crate::registry::{ErasedState, WorkflowRegistration};

use super::context::{ConditionCell, ConditionState, EngineMsg, RunCore, WfContext};
use super::machines::RunMachines;

/// An engine-level fault that fails the workflow task (not the workflow)
#[derive(Debug)]
pub(crate) struct EngineFault {
    pub cause: WorkflowTaskFailedCause,
    pub failure: TemporalFailure,
}

impl EngineFault {
    fn new(cause: WorkflowTaskFailedCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            failure: TemporalFailure::application(message, "EngineFault"),
        }
    }
}

enum HandlerKind {
    Signal { name: String },
    Update { id: String },
}

struct HandlerTask {
    kind: HandlerKind,
    fut: BoxFuture<'static, Result<Option<Payload>, WorkflowError>>,
}

/// The terminal of the workflow inbound interceptor chain: dispatches to the
/// registered handlers
struct RunDispatcher {
    registration: Arc<WorkflowRegistration>,
    state: Arc<Mutex<Option<ErasedState>>>,
    ctx: WfContext,
    converter: Arc<DataConverter>,
}

impl RunDispatcher {
    fn state(&self) -> Result<ErasedState, WorkflowError> {
        self.state.lock().clone().ok_or_else(|| {
            WorkflowError::application("workflow state not initialized", "InternalError")
        })
    }
}

impl WorkflowInboundInterceptor for RunDispatcher {
    fn execute_workflow(
        &self,
        input: ExecuteWorkflowInput,
    ) -> BoxFuture<'static, Result<Option<Payload>, WorkflowError>> {
        let registration = self.registration.clone();
        let slot = self.state.clone();
        let ctx = self.ctx.clone();
        let converter = self.converter.clone();
        async move {
            let state = (registration.factory)(&input.input, &converter)
                .map_err(WorkflowError::from_convert)?;
            *slot.lock() = Some(state.clone());
            (registration.run)(state, ctx).await
        }
        .boxed()
    }

    fn handle_signal(
        &self,
        input: HandleSignalInput,
    ) -> BoxFuture<'static, Result<(), WorkflowError>> {
        let registration = self.registration.clone();
        let state = self.state();
        let ctx = self.ctx.clone();
        async move {
            match registration.signals.get(&input.signal_name) {
                Some(handler) => handler(state?, ctx, input.input).await,
                None => {
                    warn!(signal_name = %input.signal_name, "dropping signal with no handler");
                    Ok(())
                }
            }
        }
        .boxed()
    }

    fn handle_query(&self, input: HandleQueryInput) -> Result<Option<Payload>, WorkflowError> {
        if input.query_type == METADATA_QUERY_NAME {
            let metadata = self
                .registration
                .metadata(self.ctx.current_details());
            let payload = self
                .converter
                .to_payload(&metadata)
                .map_err(WorkflowError::from_convert)?;
            return Ok(Some(payload));
        }

        let handler = self.registration.queries.get(&input.query_type).ok_or_else(|| {
            WorkflowError::application(
                format!(
                    "query '{}' is not registered on this workflow, known queries: [{}]",
                    input.query_type,
                    self.registration
                        .query_defs
                        .iter()
                        .map(|d| d.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                "QueryNotRegisteredError",
            )
        })?;

        handler(self.state()?, &input.arguments, &self.converter)
    }

    fn validate_update(&self, input: &HandleUpdateInput) -> Result<(), WorkflowError> {
        if !self
            .registration
            .update_handlers
            .contains_key(&input.update_name)
        {
            return Err(WorkflowError::application(
                format!(
                    "update '{}' is not registered on this workflow",
                    input.update_name
                ),
                "UpdateNotRegisteredError",
            ));
        }
        match self.registration.update_validators.get(&input.update_name) {
            Some(validator) => validator(self.state()?, &input.input, &self.converter),
            None => Ok(()),
        }
    }

    fn handle_update(
        &self,
        input: HandleUpdateInput,
    ) -> BoxFuture<'static, Result<Option<Payload>, WorkflowError>> {
        let registration = self.registration.clone();
        let state = self.state();
        let ctx = self.ctx.clone();
        async move {
            match registration.update_handlers.get(&input.update_name) {
                Some(handler) => handler(state?, ctx, input.input).await,
                None => Err(WorkflowError::application(
                    format!("update '{}' is not registered", input.update_name),
                    "UpdateNotRegisteredError",
                )),
            }
        }
        .boxed()
    }
}

pub(crate) struct WorkflowRun {
    run_id: String,
    core: Arc<Mutex<RunCore>>,
    msg_rx: mpsc::UnboundedReceiver<EngineMsg>,
    machines: RunMachines,
    root: Option<BoxFuture<'static, Result<Option<Payload>, WorkflowError>>>,
    handlers: Vec<HandlerTask>,
    commands: Vec<WorkflowCommand>,
    terminal: bool,
    inbound: Arc<dyn WorkflowInboundInterceptor>,
    converter: Arc<DataConverter>,
}

impl WorkflowRun {
    /// Build run state from the initialize job of the first activation
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: String,
        workflow_id: String,
        namespace: String,
        attributes: WorkflowExecutionStartedAttributes,
        start_time: chrono::DateTime<chrono::Utc>,
        registration: Arc<WorkflowRegistration>,
        providers: &[Arc<dyn WorkerInterceptor>],
        converter: Arc<DataConverter>,
    ) -> Result<Self, EngineFault> {
        let info = WorkflowInfo {
            workflow_id,
            run_id: run_id.clone(),
            workflow_type: attributes.workflow_type.clone(),
            task_queue: attributes.task_queue.clone(),
            namespace,
            attempt: attributes.attempt,
            start_time,
            run_timeout: attributes.workflow_run_timeout,
            task_timeout: attributes.workflow_task_timeout,
            execution_timeout: attributes.workflow_execution_timeout,
            retry_policy: attributes.retry_policy.clone(),
            parent: attributes.parent.clone(),
            continued_run_id: attributes.continued_execution_run_id.clone(),
            cron_schedule: attributes.cron_schedule.clone(),
            last_failure: attributes.last_failure.clone(),
        };

        let core = Arc::new(Mutex::new(RunCore::new(
            info,
            start_time,
            attributes.randomness_seed,
        )));
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let ctx = WfContext::new(core.clone(), msg_tx, converter.clone());

        let dispatcher = RunDispatcher {
            registration,
            state: Arc::new(Mutex::new(None)),
            ctx: ctx.clone(),
            converter: converter.clone(),
        };
        let inbound = build_workflow_chain(providers, Arc::new(dispatcher));

        let headers = decode_headers(&converter, attributes.headers.clone())?;
        let root = inbound.execute_workflow(ExecuteWorkflowInput {
            workflow_type: attributes.workflow_type,
            headers,
            input: attributes.input,
        });

        Ok(Self {
            run_id,
            core,
            msg_rx,
            machines: RunMachines::new(),
            root: Some(root),
            handlers: Vec::new(),
            commands: Vec::new(),
            terminal: false,
            inbound,
            converter,
        })
    }

    /// Whether the run has issued a terminal command
    pub(crate) fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Apply one activation and return the command batch
    pub(crate) fn activate(
        &mut self,
        activation: WorkflowActivation,
    ) -> Result<Vec<WorkflowCommand>, EngineFault> {
        {
            let mut core = self.core.lock();
            // The workflow clock is monotonic; stale timestamps never rewind it
            if activation.timestamp > core.now {
                core.now = activation.timestamp;
            }
            core.is_replaying = activation.is_replaying;
        }

        debug!(run_id = %self.run_id, jobs = activation.jobs.len(), "applying activation");

        let mut signals = Vec::new();
        let mut queries = Vec::new();
        let mut updates = Vec::new();

        for job in activation.jobs {
            match job {
                // Consumed at run construction
                ActivationJob::InitializeWorkflow { .. } => {}

                ActivationJob::FireTimer { seq } => {
                    self.machines.fire_timer(seq);
                }

                ActivationJob::ResolveActivity { seq, resolution } => {
                    let resolution = self.decode_activity_resolution(resolution)?;
                    self.machines.resolve_activity(seq, resolution);
                }

                ActivationJob::ResolveChildWorkflowStart { seq, resolution } => {
                    let resolution = self.decode_child_start(resolution)?;
                    self.machines.resolve_child_start(seq, resolution);
                }

                ActivationJob::ResolveChildWorkflow { seq, resolution } => {
                    let resolution = self.decode_child_resolution(resolution)?;
                    self.machines.resolve_child(seq, resolution);
                }

                ActivationJob::ResolveSignalExternalWorkflow { seq, failure } => {
                    let failure = match failure {
                        Some(f) => Some(self.decode_failure(f)?),
                        None => None,
                    };
                    self.machines.resolve_external_signal(seq, failure);
                }

                ActivationJob::SignalWorkflow {
                    signal_name,
                    input,
                    headers,
                } => signals.push((signal_name, input, headers)),

                ActivationJob::QueryWorkflow {
                    query_id,
                    query_type,
                    arguments,
                    headers,
                } => queries.push((query_id, query_type, arguments, headers)),

                ActivationJob::DoUpdate {
                    id,
                    name,
                    input,
                    headers,
                    run_validator,
                } => updates.push((id, name, input, headers, run_validator)),

                ActivationJob::CancelWorkflow { details: _ } => {
                    self.apply_cancellation();
                }

                ActivationJob::UpdateRandomSeed { seed } => {
                    self.core.lock().random = StdRng::seed_from_u64(seed);
                }

                // Handled by the worker before the run is activated
                ActivationJob::RemoveFromCache { .. } => {}
            }
        }

        // Signal handlers are enqueued in arrival order before any user code
        // resumes, so invocation order matches history order
        for (signal_name, input, headers) in signals {
            let headers = decode_headers(&self.converter, headers)?;
            let fut = self.inbound.handle_signal(HandleSignalInput {
                signal_name: signal_name.clone(),
                headers,
                input,
            });
            self.handlers.push(HandlerTask {
                kind: HandlerKind::Signal { name: signal_name },
                fut: fut.map(|r| r.map(|_| None)).boxed(),
            });
        }

        self.run_scheduler();

        // Queries observe post-signal state and must not mutate it
        for (query_id, query_type, arguments, headers) in queries {
            self.evaluate_query(query_id, query_type, arguments, headers)?;
        }

        // Update admissions, then acceptances, after queries
        let had_updates = !updates.is_empty();
        for (id, name, input, headers, run_validator) in updates {
            self.admit_update(id, name, input, headers, run_validator)?;
        }
        if had_updates {
            self.run_scheduler();
        }

        Ok(std::mem::take(&mut self.commands))
    }

    // =====================================================================
    // Scheduler
    // =====================================================================

    fn run_scheduler(&mut self) {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        loop {
            let mut progress = false;

            // Root first: the start job precedes everything in history order
            if let Some(root) = self.root.as_mut() {
                if let Poll::Ready(outcome) = root.as_mut().poll(&mut cx) {
                    self.root = None;
                    self.drain_messages();
                    self.finish_root(outcome);
                    progress = true;
                }
            }

            // Handler tasks in enqueue order
            let mut i = 0;
            while i < self.handlers.len() {
                match self.handlers[i].fut.as_mut().poll(&mut cx) {
                    Poll::Ready(outcome) => {
                        let task = self.handlers.remove(i);
                        self.drain_messages();
                        self.finish_handler(task.kind, outcome);
                        progress = true;
                    }
                    Poll::Pending => i += 1,
                }
            }

            if self.drain_messages() {
                progress = true;
            }
            if self.evaluate_conditions() {
                progress = true;
            }

            if !progress {
                break;
            }
        }
    }

    fn drain_messages(&mut self) -> bool {
        let mut any = false;
        while let Ok(msg) = self.msg_rx.try_recv() {
            any = true;
            self.process_msg(msg);
        }
        any
    }

    fn process_msg(&mut self, msg: EngineMsg) {
        if self.terminal {
            // Only cancellations from dropped futures arrive after the
            // terminal command; they have nothing left to cancel
            return;
        }
        match msg {
            EngineMsg::Timer { cmd, seq, done } => {
                self.machines.timers.insert(seq, done);
                self.commands.push(cmd);
            }
            EngineMsg::CancelTimer { seq } => {
                if self.machines.timers.remove(&seq).is_some() {
                    self.commands.push(WorkflowCommand::CancelTimer { seq });
                }
            }
            EngineMsg::Activity { cmd, seq, done } => {
                self.machines.activities.insert(seq, done);
                self.commands.push(cmd);
            }
            EngineMsg::CancelActivity { seq } => {
                if self.machines.activities.remove(&seq).is_some() {
                    self.commands.push(WorkflowCommand::CancelActivity { seq });
                }
            }
            EngineMsg::ChildStart { cmd, seq, done } => {
                self.machines.child_starts.insert(seq, done);
                self.commands.push(cmd);
            }
            EngineMsg::AwaitChild { seq, done } => {
                self.machines.await_child(seq, done);
            }
            EngineMsg::CancelChild { seq } => {
                if self.machines.child_results.contains_key(&seq) {
                    return;
                }
                self.machines.child_starts.remove(&seq);
                self.machines.children.remove(&seq);
                self.commands
                    .push(WorkflowCommand::CancelChildWorkflow { seq });
            }
            EngineMsg::ExternalSignal { cmd, seq, done } => {
                self.machines.external_signals.insert(seq, done);
                self.commands.push(cmd);
            }
            EngineMsg::Command(cmd) => {
                self.commands.push(cmd);
            }
        }
    }

    fn evaluate_conditions(&mut self) -> bool {
        let cells: Vec<Arc<ConditionCell>> = {
            let mut core = self.core.lock();
            core.conditions.retain(|cell| {
                Arc::strong_count(cell) > 1 && *cell.state.lock() == ConditionState::Pending
            });
            core.conditions.clone()
        };

        let mut woke = false;
        for cell in cells {
            if (cell.predicate)() {
                *cell.state.lock() = ConditionState::Ready;
                woke = true;
            }
        }
        woke
    }

    // =====================================================================
    // Completion handling
    // =====================================================================

    fn finish_root(&mut self, outcome: Result<Option<Payload>, WorkflowError>) {
        if self.terminal {
            return;
        }
        match outcome {
            Ok(result) => {
                self.commands
                    .push(WorkflowCommand::CompleteWorkflow { result });
            }
            Err(WorkflowError::ContinueAsNew(cmd)) => {
                self.commands.push(WorkflowCommand::ContinueAsNew(*cmd));
            }
            Err(WorkflowError::Cancelled(failure)) => {
                self.commands.push(WorkflowCommand::CancelWorkflow {
                    details: cancellation_details(&failure),
                });
            }
            Err(err) => {
                self.commands.push(WorkflowCommand::FailWorkflow {
                    failure: self.failure_to_wire(err.into_failure()),
                });
            }
        }
        self.terminal = true;
    }

    fn finish_handler(
        &mut self,
        kind: HandlerKind,
        outcome: Result<Option<Payload>, WorkflowError>,
    ) {
        match kind {
            HandlerKind::Signal { name } => match outcome {
                Ok(_) => {}
                // A signal handler interrupted by run cancellation is not a
                // workflow failure
                Err(WorkflowError::Cancelled(_)) => {}
                Err(WorkflowError::ContinueAsNew(cmd)) => {
                    if !self.terminal {
                        self.commands.push(WorkflowCommand::ContinueAsNew(*cmd));
                        self.terminal = true;
                    }
                }
                Err(err) => {
                    warn!(signal_name = %name, "signal handler failed, failing workflow");
                    if !self.terminal {
                        self.commands.push(WorkflowCommand::FailWorkflow {
                            failure: self.failure_to_wire(err.into_failure()),
                        });
                        self.terminal = true;
                    }
                }
            },
            HandlerKind::Update { id } => {
                let outcome = match outcome {
                    Ok(result) => UpdateResponseOutcome::Success { result },
                    Err(WorkflowError::ContinueAsNew(_)) => UpdateResponseOutcome::Failure {
                        failure: TemporalFailure::application(
                            "continue-as-new is not supported inside update handlers",
                            "ApplicationError",
                        ),
                    },
                    Err(err) => UpdateResponseOutcome::Failure {
                        failure: self.failure_to_wire(err.into_failure()),
                    },
                };
                // Update responses are not history-tracked; deliver even if
                // a terminal command is already buffered
                self.commands
                    .push(WorkflowCommand::RespondUpdate { id, outcome });
            }
        }
    }

    // =====================================================================
    // Queries and updates
    // =====================================================================

    fn evaluate_query(
        &mut self,
        query_id: String,
        query_type: String,
        arguments: Vec<Payload>,
        headers: Headers,
    ) -> Result<(), EngineFault> {
        let headers = decode_headers(&self.converter, headers)?;
        self.drain_messages();
        let commands_before = self.commands.len();

        let result = match self.inbound.handle_query(HandleQueryInput {
            query_type: query_type.clone(),
            headers,
            arguments,
        }) {
            Ok(payload) => QueryResult::Answered { result: payload },
            Err(err) => QueryResult::Failed {
                failure: self.failure_to_wire(err.into_failure()),
            },
        };

        self.drain_messages();
        if self.commands.len() != commands_before {
            return Err(EngineFault::new(
                WorkflowTaskFailedCause::QueryInsideMutation,
                format!("query '{query_type}' attempted to mutate workflow state"),
            ));
        }

        self.commands.push(WorkflowCommand::QueryResponse {
            id: query_id,
            result,
        });
        Ok(())
    }

    fn admit_update(
        &mut self,
        id: String,
        name: String,
        input: Vec<Payload>,
        headers: Headers,
        run_validator: bool,
    ) -> Result<(), EngineFault> {
        let headers = decode_headers(&self.converter, headers)?;
        let input = HandleUpdateInput {
            update_name: name,
            update_id: id.clone(),
            headers,
            input,
        };

        if run_validator {
            if let Err(err) = self.inbound.validate_update(&input) {
                // A rejected update never reaches history
                self.commands.push(WorkflowCommand::RejectUpdate {
                    id,
                    failure: self.failure_to_wire(err.into_failure()),
                });
                return Ok(());
            }
        }

        self.commands
            .push(WorkflowCommand::AcceptUpdate { id: id.clone() });
        let fut = self.inbound.handle_update(input);
        self.handlers.push(HandlerTask {
            kind: HandlerKind::Update { id },
            fut,
        });
        Ok(())
    }

    // =====================================================================
    // Cancellation and conversion helpers
    // =====================================================================

    fn apply_cancellation(&mut self) {
        let failure = TemporalFailure::cancelled("workflow cancellation requested");
        {
            let mut core = self.core.lock();
            core.cancelled = true;
            for cell in &core.conditions {
                let mut state = cell.state.lock();
                if *state == ConditionState::Pending {
                    *state = ConditionState::Cancelled;
                }
            }
        }
        let cancel_commands = self.machines.cancel_all(&failure);
        if !self.terminal {
            self.commands.extend(cancel_commands);
        }
    }

    fn failure_to_wire(&self, failure: TemporalFailure) -> TemporalFailure {
        match self.converter.failure_to_wire(failure) {
            Ok(f) => f,
            Err(e) => TemporalFailure::application(
                format!("failure conversion failed: {e}"),
                "DataConverterError",
            ),
        }
    }

    fn decode_failure(&self, failure: TemporalFailure) -> Result<TemporalFailure, EngineFault> {
        self.converter.failure_from_wire(failure).map_err(|e| {
            EngineFault::new(
                WorkflowTaskFailedCause::Unspecified,
                format!("payload codec failed decoding failure: {e}"),
            )
        })
    }

    fn decode_activity_resolution(
        &self,
        resolution: ActivityResolution,
    ) -> Result<ActivityResolution, EngineFault> {
        Ok(match resolution {
            ActivityResolution::Failed { failure } => ActivityResolution::Failed {
                failure: self.decode_failure(failure)?,
            },
            ActivityResolution::Cancelled { failure } => ActivityResolution::Cancelled {
                failure: self.decode_failure(failure)?,
            },
            completed => completed,
        })
    }

    fn decode_child_start(
        &self,
        resolution: StartChildResolution,
    ) -> Result<StartChildResolution, EngineFault> {
        Ok(match resolution {
            StartChildResolution::Cancelled { failure } => StartChildResolution::Cancelled {
                failure: self.decode_failure(failure)?,
            },
            other => other,
        })
    }

    fn decode_child_resolution(
        &self,
        resolution: ChildWorkflowResolution,
    ) -> Result<ChildWorkflowResolution, EngineFault> {
        Ok(match resolution {
            ChildWorkflowResolution::Failed { failure } => ChildWorkflowResolution::Failed {
                failure: self.decode_failure(failure)?,
            },
            ChildWorkflowResolution::Cancelled { failure } => ChildWorkflowResolution::Cancelled {
                failure: self.decode_failure(failure)?,
            },
            completed => completed,
        })
    }
}

fn decode_headers(
    converter: &DataConverter,
    headers: Headers,
) -> Result<Headers, EngineFault> {
    converter.decode_headers(headers).map_err(|e| {
        EngineFault::new(
            WorkflowTaskFailedCause::Unspecified,
            format!("payload codec failed decoding headers: {e}"),
        )
    })
}

fn cancellation_details(failure: &TemporalFailure) -> Vec<Payload> {
    match &failure.info {
        tempo_core::failure::FailureInfo::Cancelled { details } => details.clone(),
        _ => vec![],
    }
}
