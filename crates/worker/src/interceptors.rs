//! Worker interceptors
//!
//! An interceptor provider contributes optional wrappers for each side of
//! the worker. Chains are built once: providers are folded outermost-first,
//! each wrapping the next interceptor in line. An interceptor may mutate the
//! input struct (headers included) before delegating; downstream sees the
//! mutated input.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use tempo_core::payload::{Headers, Payload};

use crate::error::{ActivityError, WorkflowError};

/// Input to activity execution
#[derive(Debug, Clone)]
pub struct ExecuteActivityInput {
    pub activity_type: String,
    pub headers: Headers,
    pub input: Vec<Payload>,
}

/// Input to an activity heartbeat
#[derive(Debug, Clone)]
pub struct RecordHeartbeatInput {
    pub details: Vec<serde_json::Value>,
}

/// Input to workflow execution
#[derive(Debug, Clone)]
pub struct ExecuteWorkflowInput {
    pub workflow_type: String,
    pub headers: Headers,
    pub input: Vec<Payload>,
}

/// Input to a signal delivery
#[derive(Debug, Clone)]
pub struct HandleSignalInput {
    pub signal_name: String,
    pub headers: Headers,
    pub input: Vec<Payload>,
}

/// Input to a query evaluation
#[derive(Debug, Clone)]
pub struct HandleQueryInput {
    pub query_type: String,
    pub headers: Headers,
    pub arguments: Vec<Payload>,
}

/// Input to an update validation or execution
#[derive(Debug, Clone)]
pub struct HandleUpdateInput {
    pub update_name: String,
    pub update_id: String,
    pub headers: Headers,
    pub input: Vec<Payload>,
}

/// Wraps activity execution (inbound)
#[async_trait]
pub trait ActivityInboundInterceptor: Send + Sync {
    async fn execute_activity(
        &self,
        input: ExecuteActivityInput,
    ) -> Result<Option<Payload>, ActivityError>;
}

/// Wraps activity heartbeats (outbound)
pub trait ActivityOutboundInterceptor: Send + Sync {
    fn record_heartbeat(&self, input: RecordHeartbeatInput);
}

/// Wraps workflow dispatch (inbound)
///
/// `execute_workflow`, `handle_signal`, and `handle_update` construct the
/// future the deterministic scheduler will drive; `handle_query` and
/// `validate_update` run synchronously inside the activation.
pub trait WorkflowInboundInterceptor: Send + Sync {
    fn execute_workflow(
        &self,
        input: ExecuteWorkflowInput,
    ) -> BoxFuture<'static, Result<Option<Payload>, WorkflowError>>;

    fn handle_signal(
        &self,
        input: HandleSignalInput,
    ) -> BoxFuture<'static, Result<(), WorkflowError>>;

    fn handle_query(&self, input: HandleQueryInput) -> Result<Option<Payload>, WorkflowError>;

    fn validate_update(&self, input: &HandleUpdateInput) -> Result<(), WorkflowError>;

    fn handle_update(
        &self,
        input: HandleUpdateInput,
    ) -> BoxFuture<'static, Result<Option<Payload>, WorkflowError>>;
}

/// A provider of optional sub-interceptors for the worker
///
/// Default implementations pass through, so a provider only overrides the
/// hooks it cares about.
pub trait WorkerInterceptor: Send + Sync {
    /// Wrap activity execution; return `next` to leave it untouched
    fn intercept_activity(
        &self,
        next: Arc<dyn ActivityInboundInterceptor>,
    ) -> Arc<dyn ActivityInboundInterceptor> {
        next
    }

    /// Wrap activity heartbeats
    fn intercept_activity_heartbeat(
        &self,
        next: Arc<dyn ActivityOutboundInterceptor>,
    ) -> Arc<dyn ActivityOutboundInterceptor> {
        next
    }

    /// Wrap workflow dispatch
    fn intercept_workflow(
        &self,
        next: Arc<dyn WorkflowInboundInterceptor>,
    ) -> Arc<dyn WorkflowInboundInterceptor> {
        next
    }
}

/// Fold providers around a terminal, outermost-first
pub(crate) fn build_activity_chain(
    providers: &[Arc<dyn WorkerInterceptor>],
    terminal: Arc<dyn ActivityInboundInterceptor>,
) -> Arc<dyn ActivityInboundInterceptor> {
    providers
        .iter()
        .rev()
        .fold(terminal, |next, provider| provider.intercept_activity(next))
}

pub(crate) fn build_heartbeat_chain(
    providers: &[Arc<dyn WorkerInterceptor>],
    terminal: Arc<dyn ActivityOutboundInterceptor>,
) -> Arc<dyn ActivityOutboundInterceptor> {
    providers.iter().rev().fold(terminal, |next, provider| {
        provider.intercept_activity_heartbeat(next)
    })
}

pub(crate) fn build_workflow_chain(
    providers: &[Arc<dyn WorkerInterceptor>],
    terminal: Arc<dyn WorkflowInboundInterceptor>,
) -> Arc<dyn WorkflowInboundInterceptor> {
    providers
        .iter()
        .rev()
        .fold(terminal, |next, provider| provider.intercept_workflow(next))
}
