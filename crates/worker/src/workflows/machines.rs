//! Pending-resolution tracking for one run
//!
//! Every suspended primitive is keyed by the sequence number its command
//! carried. Resolution jobs look the sender up and wake the owning future;
//! a stale resolution (e.g. a timer fired after its cancel) is ignored.

use std::collections::HashMap;

use tokio::sync::oneshot;

use tempo_core::bridge::{ActivityResolution, ChildWorkflowResolution, StartChildResolution};
use tempo_core::command::WorkflowCommand;
use tempo_core::failure::TemporalFailure;

use super::context::TimerOutcome;

#[derive(Default)]
pub(crate) struct RunMachines {
    pub(crate) timers: HashMap<u32, oneshot::Sender<TimerOutcome>>,
    pub(crate) activities: HashMap<u32, oneshot::Sender<ActivityResolution>>,
    pub(crate) child_starts: HashMap<u32, oneshot::Sender<StartChildResolution>>,
    pub(crate) children: HashMap<u32, oneshot::Sender<ChildWorkflowResolution>>,
    /// Terminal child results that arrived before anyone awaited them
    pub(crate) child_results: HashMap<u32, ChildWorkflowResolution>,
    pub(crate) external_signals: HashMap<u32, oneshot::Sender<Option<TemporalFailure>>>,
}

impl RunMachines {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fire_timer(&mut self, seq: u32) -> bool {
        match self.timers.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(TimerOutcome::Fired);
                true
            }
            None => false,
        }
    }

    pub(crate) fn resolve_activity(&mut self, seq: u32, resolution: ActivityResolution) -> bool {
        match self.activities.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }

    pub(crate) fn resolve_child_start(
        &mut self,
        seq: u32,
        resolution: StartChildResolution,
    ) -> bool {
        match self.child_starts.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }

    pub(crate) fn resolve_child(&mut self, seq: u32, resolution: ChildWorkflowResolution) {
        match self.children.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(resolution);
            }
            // Result arrived before the handle was awaited; stash it
            None => {
                self.child_results.insert(seq, resolution);
            }
        }
    }

    pub(crate) fn await_child(
        &mut self,
        seq: u32,
        tx: oneshot::Sender<ChildWorkflowResolution>,
    ) {
        if let Some(resolution) = self.child_results.remove(&seq) {
            let _ = tx.send(resolution);
        } else {
            self.children.insert(seq, tx);
        }
    }

    pub(crate) fn resolve_external_signal(&mut self, seq: u32, failure: Option<TemporalFailure>) {
        if let Some(tx) = self.external_signals.remove(&seq) {
            let _ = tx.send(failure);
        }
    }

    /// Cancel everything currently in flight, returning the cancel commands
    /// to buffer. Invoked when workflow cancellation is delivered.
    pub(crate) fn cancel_all(&mut self, failure: &TemporalFailure) -> Vec<WorkflowCommand> {
        let mut commands = Vec::new();

        let mut timer_seqs: Vec<_> = self.timers.keys().copied().collect();
        timer_seqs.sort_unstable();
        for seq in timer_seqs {
            if let Some(tx) = self.timers.remove(&seq) {
                let _ = tx.send(TimerOutcome::Cancelled(failure.clone()));
                commands.push(WorkflowCommand::CancelTimer { seq });
            }
        }

        let mut activity_seqs: Vec<_> = self.activities.keys().copied().collect();
        activity_seqs.sort_unstable();
        for seq in activity_seqs {
            if let Some(tx) = self.activities.remove(&seq) {
                let _ = tx.send(ActivityResolution::Cancelled {
                    failure: failure.clone(),
                });
                commands.push(WorkflowCommand::CancelActivity { seq });
            }
        }

        let mut child_seqs: Vec<_> = self
            .child_starts
            .keys()
            .chain(self.children.keys())
            .copied()
            .collect();
        child_seqs.sort_unstable();
        child_seqs.dedup();
        for seq in child_seqs {
            if let Some(tx) = self.child_starts.remove(&seq) {
                let _ = tx.send(StartChildResolution::Cancelled {
                    failure: failure.clone(),
                });
            }
            if let Some(tx) = self.children.remove(&seq) {
                let _ = tx.send(ChildWorkflowResolution::Cancelled {
                    failure: failure.clone(),
                });
            }
            commands.push(WorkflowCommand::CancelChildWorkflow { seq });
        }

        let mut signal_seqs: Vec<_> = self.external_signals.keys().copied().collect();
        signal_seqs.sort_unstable();
        for seq in signal_seqs {
            if let Some(tx) = self.external_signals.remove(&seq) {
                let _ = tx.send(Some(failure.clone()));
            }
        }

        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_unknown_timer_ignored() {
        let mut machines = RunMachines::new();
        assert!(!machines.fire_timer(42));
    }

    #[tokio::test]
    async fn test_child_result_stash() {
        let mut machines = RunMachines::new();
        machines.resolve_child(1, ChildWorkflowResolution::Completed { result: None });

        let (tx, rx) = oneshot::channel();
        machines.await_child(1, tx);
        assert!(matches!(
            rx.await,
            Ok(ChildWorkflowResolution::Completed { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_all_emits_cancel_commands() {
        let mut machines = RunMachines::new();
        let (t1, _r1) = oneshot::channel();
        let (a1, _r2) = oneshot::channel();
        machines.timers.insert(1, t1);
        machines.activities.insert(1, a1);

        let failure = TemporalFailure::cancelled("cancel requested");
        let commands = machines.cancel_all(&failure);

        assert_eq!(commands.len(), 2);
        assert!(commands
            .iter()
            .any(|c| matches!(c, WorkflowCommand::CancelTimer { seq: 1 })));
        assert!(commands
            .iter()
            .any(|c| matches!(c, WorkflowCommand::CancelActivity { seq: 1 })));
    }
}
