//! History replayer
//!
//! Drives a registered workflow against a recorded history and verifies
//! that the re-issued command sequence matches the recorded one. Any
//! divergence is non-determinism, reported the way a live worker would
//! report it: as a workflow-task failure, leaving the workflow running.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use tempo_core::bridge::{ActivationJob, ActivityResolution, ChildWorkflowResolution,
    StartChildResolution, WorkflowActivation};
use tempo_core::command::WorkflowCommand;
use tempo_core::failure::TemporalFailure;
use tempo_core::history::{EventAttributes, HistoryEvent, WorkflowTaskFailedCause};
use tempo_convert::DataConverter;

use crate::interceptors::WorkerInterceptor;
use crate::registry::Registry;

use super::run::WorkflowRun;

/// Replay failures
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The history is not a well-formed event sequence
    #[error("invalid history: {0}")]
    InvalidHistory(String),

    /// Replay produced a command sequence diverging from history
    #[error("nondeterminism detected: {0}")]
    NonDeterminism(String),

    /// The engine failed the workflow task for another reason
    #[error("workflow task failed ({cause:?}): {failure}")]
    TaskFailed {
        cause: WorkflowTaskFailedCause,
        failure: TemporalFailure,
    },
}

impl ReplayError {
    /// The task-failure cause a live worker would report
    pub fn task_failed_cause(&self) -> WorkflowTaskFailedCause {
        match self {
            Self::NonDeterminism(_) => WorkflowTaskFailedCause::NonDeterministicError,
            Self::TaskFailed { cause, .. } => *cause,
            Self::InvalidHistory(_) => WorkflowTaskFailedCause::Unspecified,
        }
    }
}

/// Commands produced by a successful replay, one batch per workflow task
#[derive(Debug)]
pub struct ReplayOutcome {
    pub command_batches: Vec<Vec<WorkflowCommand>>,
}

impl ReplayOutcome {
    /// All commands flattened in emission order
    pub fn commands(&self) -> Vec<&WorkflowCommand> {
        self.command_batches.iter().flatten().collect()
    }
}

struct TaskSlice {
    timestamp: DateTime<Utc>,
    jobs: Vec<ActivationJob>,
    expected: Vec<(&'static str, Option<u32>)>,
}

/// Replays recorded histories against registered workflows
pub struct Replayer {
    registry: Arc<Registry>,
    converter: Arc<DataConverter>,
    providers: Vec<Arc<dyn WorkerInterceptor>>,
    namespace: String,
}

impl Replayer {
    pub fn new(registry: Arc<Registry>, converter: Arc<DataConverter>) -> Self {
        Self {
            registry,
            converter,
            providers: vec![],
            namespace: "default".to_string(),
        }
    }

    pub fn with_interceptors(mut self, providers: Vec<Arc<dyn WorkerInterceptor>>) -> Self {
        self.providers = providers;
        self
    }

    /// Replay one run's history
    pub fn replay(
        &self,
        workflow_id: &str,
        run_id: &str,
        history: &[HistoryEvent],
    ) -> Result<ReplayOutcome, ReplayError> {
        let tasks = partition_history(workflow_id, history)?;
        if tasks.is_empty() {
            return Err(ReplayError::InvalidHistory(
                "history contains no workflow task".to_string(),
            ));
        }

        let Some(ActivationJob::InitializeWorkflow { attributes, .. }) = tasks[0]
            .jobs
            .iter()
            .find(|j| matches!(j, ActivationJob::InitializeWorkflow { .. }))
        else {
            return Err(ReplayError::InvalidHistory(
                "first workflow task carries no start event".to_string(),
            ));
        };

        let registration = self
            .registry
            .workflow(&attributes.workflow_type)
            .ok_or_else(|| {
                ReplayError::InvalidHistory(format!(
                    "workflow type '{}' is not registered",
                    attributes.workflow_type
                ))
            })?;

        let mut run = WorkflowRun::new(
            run_id.to_string(),
            workflow_id.to_string(),
            self.namespace.clone(),
            attributes.clone(),
            tasks[0].timestamp,
            registration,
            &self.providers,
            self.converter.clone(),
        )
        .map_err(|fault| ReplayError::TaskFailed {
            cause: fault.cause,
            failure: fault.failure,
        })?;

        let mut command_batches = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            debug!(task = index, jobs = task.jobs.len(), "replaying workflow task");
            let activation = WorkflowActivation {
                run_id: run_id.to_string(),
                timestamp: task.timestamp,
                is_replaying: true,
                history_length: 0,
                jobs: task.jobs,
            };

            let commands = run
                .activate(activation)
                .map_err(|fault| ReplayError::TaskFailed {
                    cause: fault.cause,
                    failure: fault.failure,
                })?;

            verify_commands(index, &commands, &task.expected)?;
            command_batches.push(commands);
        }

        Ok(ReplayOutcome { command_batches })
    }
}

fn emitted_seq(cmd: &WorkflowCommand) -> Option<u32> {
    match cmd {
        WorkflowCommand::StartTimer { seq, .. }
        | WorkflowCommand::CancelTimer { seq }
        | WorkflowCommand::CancelActivity { seq }
        | WorkflowCommand::CancelChildWorkflow { seq }
        | WorkflowCommand::SignalExternalWorkflow { seq, .. }
        | WorkflowCommand::CancelExternalWorkflow { seq, .. } => Some(*seq),
        WorkflowCommand::ScheduleActivity(cmd) => Some(cmd.seq),
        WorkflowCommand::StartChildWorkflow(cmd) => Some(cmd.seq),
        _ => None,
    }
}

fn expected_from_event(attributes: &EventAttributes) -> Option<(&'static str, Option<u32>)> {
    match attributes {
        EventAttributes::TimerStarted { seq, .. } => Some(("StartTimer", Some(*seq))),
        EventAttributes::TimerCanceled { seq } => Some(("CancelTimer", Some(*seq))),
        EventAttributes::ActivityTaskScheduled { seq, .. } => {
            Some(("ScheduleActivity", Some(*seq)))
        }
        EventAttributes::ActivityTaskCancelRequested { seq } => {
            Some(("CancelActivity", Some(*seq)))
        }
        EventAttributes::StartChildWorkflowExecutionInitiated { seq, .. } => {
            Some(("StartChildWorkflow", Some(*seq)))
        }
        EventAttributes::SignalExternalWorkflowExecutionInitiated { seq, .. } => {
            Some(("SignalExternalWorkflow", Some(*seq)))
        }
        EventAttributes::RequestCancelExternalWorkflowExecutionInitiated { seq, .. } => {
            Some(("CancelExternalWorkflow", Some(*seq)))
        }
        EventAttributes::UpsertWorkflowSearchAttributes { .. } => {
            Some(("UpsertSearchAttributes", None))
        }
        EventAttributes::WorkflowExecutionCompleted { .. } => Some(("CompleteWorkflow", None)),
        EventAttributes::WorkflowExecutionFailed { .. } => Some(("FailWorkflow", None)),
        EventAttributes::WorkflowExecutionCanceled { .. } => Some(("CancelWorkflow", None)),
        EventAttributes::WorkflowExecutionContinuedAsNew { .. } => {
            Some(("ContinueAsNew", None))
        }
        _ => None,
    }
}

fn verify_commands(
    task_index: usize,
    commands: &[WorkflowCommand],
    expected: &[(&'static str, Option<u32>)],
) -> Result<(), ReplayError> {
    let emitted: Vec<_> = commands.iter().filter(|c| c.is_history_tracked()).collect();

    if emitted.len() != expected.len() {
        return Err(ReplayError::NonDeterminism(format!(
            "workflow task {task_index} produced {} commands where history recorded {}: \
             emitted [{}], recorded [{}]",
            emitted.len(),
            expected.len(),
            emitted
                .iter()
                .map(|c| c.kind())
                .collect::<Vec<_>>()
                .join(", "),
            expected
                .iter()
                .map(|(k, _)| *k)
                .collect::<Vec<_>>()
                .join(", "),
        )));
    }

    for (cmd, (kind, seq)) in emitted.iter().zip(expected) {
        if cmd.kind() != *kind || emitted_seq(cmd) != *seq {
            return Err(ReplayError::NonDeterminism(format!(
                "workflow task {task_index}: command {} (seq {:?}) does not match recorded \
                 event {} (seq {:?})",
                cmd.kind(),
                emitted_seq(cmd),
                kind,
                seq,
            )));
        }
    }

    Ok(())
}

fn partition_history(
    workflow_id: &str,
    history: &[HistoryEvent],
) -> Result<Vec<TaskSlice>, ReplayError> {
    match history.first().map(|e| &e.attributes) {
        Some(EventAttributes::WorkflowExecutionStarted(_)) => {}
        _ => {
            return Err(ReplayError::InvalidHistory(
                "first event must be WorkflowExecutionStarted".to_string(),
            ))
        }
    }

    let mut tasks: Vec<TaskSlice> = Vec::new();
    let mut pending_jobs: Vec<ActivationJob> = Vec::new();
    // Maps scheduled/initiated event ids back to command sequence numbers
    let mut activity_seqs: HashMap<i64, u32> = HashMap::new();
    let mut timer_seqs: HashMap<i64, u32> = HashMap::new();
    let mut child_seqs: HashMap<i64, u32> = HashMap::new();
    let mut external_seqs: HashMap<i64, u32> = HashMap::new();

    for event in history {
        if let Some(expected) = expected_from_event(&event.attributes) {
            if let Some(task) = tasks.last_mut() {
                task.expected.push(expected);
            }
        }

        match &event.attributes {
            EventAttributes::WorkflowExecutionStarted(attributes) => {
                pending_jobs.push(ActivationJob::InitializeWorkflow {
                    workflow_id: workflow_id.to_string(),
                    attributes: attributes.clone(),
                });
            }

            EventAttributes::WorkflowTaskStarted {} => {
                tasks.push(TaskSlice {
                    timestamp: event.event_time,
                    jobs: std::mem::take(&mut pending_jobs),
                    expected: vec![],
                });
            }

            EventAttributes::WorkflowTaskScheduled {}
            | EventAttributes::WorkflowTaskCompleted {}
            | EventAttributes::WorkflowTaskFailed { .. }
            | EventAttributes::WorkflowTaskTimedOut {} => {}

            EventAttributes::TimerStarted { seq, .. } => {
                timer_seqs.insert(event.event_id, *seq);
            }
            EventAttributes::TimerFired { seq, .. } => {
                pending_jobs.push(ActivationJob::FireTimer { seq: *seq });
            }
            EventAttributes::TimerCanceled { .. } => {}

            EventAttributes::ActivityTaskScheduled { seq, .. } => {
                activity_seqs.insert(event.event_id, *seq);
            }
            EventAttributes::ActivityTaskStarted { .. } => {}
            EventAttributes::ActivityTaskCompleted {
                scheduled_event_id,
                result,
            } => {
                let seq = lookup_seq(&activity_seqs, *scheduled_event_id, "activity")?;
                pending_jobs.push(ActivationJob::ResolveActivity {
                    seq,
                    resolution: ActivityResolution::Completed {
                        result: result.clone(),
                    },
                });
            }
            EventAttributes::ActivityTaskFailed {
                scheduled_event_id,
                failure,
            }
            | EventAttributes::ActivityTaskTimedOut {
                scheduled_event_id,
                failure,
            } => {
                let seq = lookup_seq(&activity_seqs, *scheduled_event_id, "activity")?;
                pending_jobs.push(ActivationJob::ResolveActivity {
                    seq,
                    resolution: ActivityResolution::Failed {
                        failure: failure.clone(),
                    },
                });
            }
            EventAttributes::ActivityTaskCancelRequested { .. } => {}
            EventAttributes::ActivityTaskCanceled {
                scheduled_event_id, ..
            } => {
                let seq = lookup_seq(&activity_seqs, *scheduled_event_id, "activity")?;
                pending_jobs.push(ActivationJob::ResolveActivity {
                    seq,
                    resolution: ActivityResolution::Cancelled {
                        failure: TemporalFailure::cancelled("activity cancelled"),
                    },
                });
            }

            EventAttributes::WorkflowExecutionSignaled {
                signal_name,
                input,
                headers,
            } => {
                pending_jobs.push(ActivationJob::SignalWorkflow {
                    signal_name: signal_name.clone(),
                    input: input.clone(),
                    headers: headers.clone(),
                });
            }

            EventAttributes::WorkflowExecutionCancelRequested {} => {
                pending_jobs.push(ActivationJob::CancelWorkflow { details: vec![] });
            }

            EventAttributes::StartChildWorkflowExecutionInitiated { seq, .. } => {
                child_seqs.insert(event.event_id, *seq);
            }
            EventAttributes::StartChildWorkflowExecutionFailed {
                initiated_event_id,
                workflow_id,
                workflow_type,
                cause,
            } => {
                let seq = lookup_seq(&child_seqs, *initiated_event_id, "child workflow")?;
                pending_jobs.push(ActivationJob::ResolveChildWorkflowStart {
                    seq,
                    resolution: StartChildResolution::Failed {
                        workflow_id: workflow_id.clone(),
                        workflow_type: workflow_type.clone(),
                        cause: *cause,
                    },
                });
            }
            EventAttributes::ChildWorkflowExecutionStarted {
                initiated_event_id,
                run_id,
            } => {
                let seq = lookup_seq(&child_seqs, *initiated_event_id, "child workflow")?;
                pending_jobs.push(ActivationJob::ResolveChildWorkflowStart {
                    seq,
                    resolution: StartChildResolution::Succeeded {
                        run_id: run_id.clone(),
                    },
                });
            }
            EventAttributes::ChildWorkflowExecutionCompleted {
                initiated_event_id,
                result,
            } => {
                let seq = lookup_seq(&child_seqs, *initiated_event_id, "child workflow")?;
                pending_jobs.push(ActivationJob::ResolveChildWorkflow {
                    seq,
                    resolution: ChildWorkflowResolution::Completed {
                        result: result.clone(),
                    },
                });
            }
            EventAttributes::ChildWorkflowExecutionFailed {
                initiated_event_id,
                failure,
            } => {
                let seq = lookup_seq(&child_seqs, *initiated_event_id, "child workflow")?;
                pending_jobs.push(ActivationJob::ResolveChildWorkflow {
                    seq,
                    resolution: ChildWorkflowResolution::Failed {
                        failure: failure.clone(),
                    },
                });
            }
            EventAttributes::ChildWorkflowExecutionCanceled {
                initiated_event_id, ..
            } => {
                let seq = lookup_seq(&child_seqs, *initiated_event_id, "child workflow")?;
                pending_jobs.push(ActivationJob::ResolveChildWorkflow {
                    seq,
                    resolution: ChildWorkflowResolution::Cancelled {
                        failure: TemporalFailure::cancelled("child workflow cancelled"),
                    },
                });
            }

            EventAttributes::SignalExternalWorkflowExecutionInitiated { seq, .. } => {
                external_seqs.insert(event.event_id, *seq);
            }
            EventAttributes::ExternalWorkflowExecutionSignaled { initiated_event_id } => {
                let seq = lookup_seq(&external_seqs, *initiated_event_id, "external signal")?;
                pending_jobs.push(ActivationJob::ResolveSignalExternalWorkflow {
                    seq,
                    failure: None,
                });
            }
            EventAttributes::SignalExternalWorkflowExecutionFailed { initiated_event_id } => {
                let seq = lookup_seq(&external_seqs, *initiated_event_id, "external signal")?;
                pending_jobs.push(ActivationJob::ResolveSignalExternalWorkflow {
                    seq,
                    failure: Some(TemporalFailure::application(
                        "external workflow not found",
                        "ExternalWorkflowError",
                    )),
                });
            }
            EventAttributes::RequestCancelExternalWorkflowExecutionInitiated { .. }
            | EventAttributes::ExternalWorkflowExecutionCancelRequested { .. } => {}

            EventAttributes::UpsertWorkflowSearchAttributes { .. } => {}

            EventAttributes::WorkflowExecutionUpdateAccepted {
                update_id,
                name,
                input,
                headers,
            } => {
                pending_jobs.push(ActivationJob::DoUpdate {
                    id: update_id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                    headers: headers.clone(),
                    run_validator: false,
                });
            }
            EventAttributes::WorkflowExecutionUpdateCompleted { .. } => {}

            EventAttributes::WorkflowExecutionCompleted { .. }
            | EventAttributes::WorkflowExecutionFailed { .. }
            | EventAttributes::WorkflowExecutionCanceled { .. }
            | EventAttributes::WorkflowExecutionTerminated { .. }
            | EventAttributes::WorkflowExecutionTimedOut {}
            | EventAttributes::WorkflowExecutionContinuedAsNew { .. } => {}
        }
    }

    Ok(tasks)
}

fn lookup_seq(
    map: &HashMap<i64, u32>,
    event_id: i64,
    what: &str,
) -> Result<u32, ReplayError> {
    map.get(&event_id).copied().ok_or_else(|| {
        ReplayError::InvalidHistory(format!(
            "{what} resolution references unknown scheduled event {event_id}"
        ))
    })
}
