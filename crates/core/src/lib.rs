//! # Tempo core
//!
//! Shared data model and external interfaces for the Tempo SDK:
//!
//! - **Payloads and failures**: the wire form of values and typed errors
//! - **Commands and activations**: what the workflow engine consumes and emits
//! - **History**: the event model used by replay and close-event polling
//! - **`WorkflowService`**: the cluster's unary RPC surface as a trait
//! - **`CoreBridge`**: the poll/complete boundary to the Core runtime
//!
//! This crate performs no I/O of its own; transports implement the traits.

pub mod bridge;
pub mod command;
pub mod common;
pub mod error;
pub mod failure;
pub mod history;
pub mod payload;
pub mod retry;
pub mod schedule;
pub mod search;
pub mod service;

/// Source identifier stamped on failures produced by this SDK
pub const SDK_SOURCE: &str = "TempoSDK";

/// Reserved query returning a workflow's declared metadata
pub const METADATA_QUERY_NAME: &str = "__temporal_workflow_metadata";

// Re-export key types at crate root
pub use bridge::{
    ActivationJob, ActivityExecutionResult, ActivityHeartbeat, ActivityResolution, ActivityTask,
    ActivityTaskCompletion, ActivityTaskVariant, BridgeError, CoreBridge, WorkflowActivation,
    WorkflowActivationCompletion,
};
pub use command::WorkflowCommand;
pub use common::{
    ActivityInfo, WorkflowExecution, WorkflowExecutionInfo, WorkflowExecutionStatus,
    WorkflowIdConflictPolicy, WorkflowIdReusePolicy, WorkflowInfo,
};
pub use error::{ArgumentError, RpcError, RpcErrorKind};
pub use failure::{FailureInfo, RetryState, TemporalFailure, TimeoutType};
pub use history::{EventAttributes, HistoryEvent, WorkflowTaskFailedCause};
pub use payload::{Headers, Memo, Payload};
pub use retry::RetryPolicy;
pub use schedule::{Schedule, ScheduleBackfill, ScheduleOverlapPolicy, SchedulePatch};
pub use search::SearchAttributeValue;
pub use service::WorkflowService;
