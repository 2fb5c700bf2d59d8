//! Activity execution context
//!
//! The context is ambient within the activity's task tree (a tokio task
//! local) and also passed to the handler directly. Heartbeats go through a
//! single-slot latest-wins channel drained by a dedicated sender task, so
//! bursts coalesce into one outbound record carrying the newest details.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;

use tempo_core::common::ActivityInfo;
use tempo_convert::DataConverterError;

use crate::interceptors::{ActivityOutboundInterceptor, RecordHeartbeatInput};

tokio::task_local! {
    static ACTIVITY_CONTEXT: ActivityContext;
}

/// Why an activity is being cancelled, in order of precedence
#[derive(Debug, Clone)]
pub enum ActivityCancellationReason {
    /// The activity no longer exists on the cluster
    GoneFromServer,

    /// The cluster explicitly requested cancellation
    ServerRequest,

    /// A timeout elapsed cluster-side
    Timeout,

    /// This worker is shutting down
    WorkerShutdown,

    /// Heartbeat details could not be converted; the underlying error is
    /// propagated instead of a cancelled error when the activity fails
    HeartbeatRecordFailure(Arc<DataConverterError>),
}

/// Context provided to activities during execution
#[derive(Clone)]
pub struct ActivityContext {
    info: Arc<ActivityInfo>,
    heartbeat_chain: Arc<dyn ActivityOutboundInterceptor>,
    cancel_rx: watch::Receiver<Option<ActivityCancellationReason>>,
}

impl ActivityContext {
    pub(crate) fn new(
        info: Arc<ActivityInfo>,
        heartbeat_chain: Arc<dyn ActivityOutboundInterceptor>,
        cancel_rx: watch::Receiver<Option<ActivityCancellationReason>>,
    ) -> Self {
        Self {
            info,
            heartbeat_chain,
            cancel_rx,
        }
    }

    /// The ambient context of the current activity task, if any
    ///
    /// Present anywhere below the handler in the task tree; activities
    /// running concurrently never see each other's contexts.
    pub fn current() -> Option<ActivityContext> {
        ACTIVITY_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Run a future with this context installed as the ambient one
    pub(crate) async fn scope<F: std::future::Future>(&self, fut: F) -> F::Output {
        ACTIVITY_CONTEXT.scope(self.clone(), fut).await
    }

    /// Info about the current activity task
    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    /// Record a heartbeat carrying optional progress details
    ///
    /// Heartbeats are coalesced: only the latest unsent details reach the
    /// cluster. Conversion failures in the sender task cancel the activity
    /// with [`ActivityCancellationReason::HeartbeatRecordFailure`].
    pub fn heartbeat<T: Serialize>(&self, details: &T) {
        match serde_json::to_value(details) {
            Ok(value) => self.heartbeat_chain.record_heartbeat(RecordHeartbeatInput {
                details: vec![value],
            }),
            Err(e) => {
                warn!(activity_id = %self.info.activity_id, error = %e,
                    "dropping heartbeat details that failed to serialize");
            }
        }
    }

    /// Record a heartbeat without details
    pub fn heartbeat_empty(&self) {
        self.heartbeat_chain
            .record_heartbeat(RecordHeartbeatInput { details: vec![] });
    }

    /// The cancellation reason, once cancellation was requested
    pub fn cancellation_reason(&self) -> Option<ActivityCancellationReason> {
        self.cancel_rx.borrow().clone()
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel_rx.borrow().is_some()
    }

    /// Wait until cancellation is requested, returning the reason
    ///
    /// Useful in `select!` against the actual work.
    pub async fn cancelled(&self) -> ActivityCancellationReason {
        let mut rx = self.cancel_rx.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Worker side dropped; treat as shutdown
                return ActivityCancellationReason::WorkerShutdown;
            }
        }
    }
}
