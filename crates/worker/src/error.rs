//! Worker-side error types

use std::time::Duration;

use tempo_core::command::ContinueAsNewCmd;
use tempo_core::failure::{FailureInfo, TemporalFailure};
use tempo_convert::{DataConverter, DataConverterError};

use crate::activities::ActivityCancellationReason;

/// Error raised by workflow code and engine primitives inside a run
///
/// Workflow run functions and signal/update handlers return this; the engine
/// maps the variants onto terminal commands.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Cooperative cancellation propagating through suspended primitives
    #[error("workflow cancelled: {}", .0.message)]
    Cancelled(TemporalFailure),

    /// Continue-as-new sentinel produced by the workflow context
    #[error("workflow continuing as new")]
    ContinueAsNew(Box<ContinueAsNewCmd>),

    /// Any other failure (application errors, activity/child failures)
    #[error("{0}")]
    Failure(TemporalFailure),
}

impl WorkflowError {
    /// An application failure with the given error type
    pub fn application(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self::Failure(TemporalFailure::application(message, error_type))
    }

    /// A non-retryable application failure
    pub fn non_retryable(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self::Failure(TemporalFailure::application(message, error_type).non_retryable())
    }

    /// A cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(TemporalFailure::cancelled(message))
    }

    /// The underlying failure, when one exists
    pub fn failure(&self) -> Option<&TemporalFailure> {
        match self {
            Self::Cancelled(f) | Self::Failure(f) => Some(f),
            Self::ContinueAsNew(_) => None,
        }
    }

    /// Whether this error is the cancellation variant
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub(crate) fn from_convert(err: DataConverterError) -> Self {
        Self::Failure(
            TemporalFailure::application(err.to_string(), "DataConverterError").non_retryable(),
        )
    }

    /// Render into the wire failure that terminates or reports on the run
    pub(crate) fn into_failure(self) -> TemporalFailure {
        match self {
            Self::Cancelled(f) | Self::Failure(f) => f,
            Self::ContinueAsNew(_) => {
                TemporalFailure::application("continue-as-new escaped the engine", "InternalError")
            }
        }
    }
}

/// Error raised by activity handlers
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// An application-level failure
    #[error("{message}")]
    Application {
        message: String,
        error_type: String,
        non_retryable: bool,
        details: Vec<serde_json::Value>,
        next_retry_delay: Option<Duration>,
    },

    /// The activity observed cancellation and is giving up
    #[error("activity cancelled")]
    Cancelled {
        reason: Option<ActivityCancellationReason>,
    },

    /// Distinguished sentinel: the activity will be completed later through
    /// the async-activity client API
    #[error("activity will complete asynchronously")]
    CompleteAsync,

    /// A pre-built failure, passed through unchanged
    #[error("{0}")]
    Failure(TemporalFailure),
}

impl ActivityError {
    /// An application failure with a generic type
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            error_type: "ApplicationError".to_string(),
            non_retryable: false,
            details: vec![],
            next_retry_delay: None,
        }
    }

    /// Set the application error type
    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        if let Self::Application { error_type, .. } = &mut self {
            *error_type = ty.into();
        }
        self
    }

    /// Mark the application failure non-retryable
    pub fn non_retryable(mut self) -> Self {
        if let Self::Application { non_retryable, .. } = &mut self {
            *non_retryable = true;
        }
        self
    }

    /// Attach a serializable detail value
    pub fn with_detail(mut self, value: serde_json::Value) -> Self {
        if let Self::Application { details, .. } = &mut self {
            details.push(value);
        }
        self
    }

    /// Override the next retry delay
    pub fn with_next_retry_delay(mut self, delay: Duration) -> Self {
        if let Self::Application {
            next_retry_delay, ..
        } = &mut self
        {
            *next_retry_delay = Some(delay);
        }
        self
    }

    /// The cancellation sentinel without a recorded reason
    pub fn cancelled() -> Self {
        Self::Cancelled { reason: None }
    }

    /// Convert into the wire failure form
    pub(crate) fn into_failure(self, converter: &DataConverter) -> TemporalFailure {
        match self {
            Self::Application {
                message,
                error_type,
                non_retryable,
                details,
                next_retry_delay,
            } => {
                let details = details
                    .iter()
                    .filter_map(|v| converter.to_payload(v).ok())
                    .collect();
                TemporalFailure {
                    message,
                    source: tempo_core::SDK_SOURCE.to_string(),
                    stack_trace: String::new(),
                    encoded_attributes: None,
                    cause: None,
                    info: FailureInfo::Application {
                        details,
                        error_type,
                        non_retryable,
                        next_retry_delay,
                    },
                }
            }
            Self::Cancelled { .. } => TemporalFailure::cancelled("activity cancelled"),
            Self::CompleteAsync => TemporalFailure::application(
                "async completion sentinel escaped the worker",
                "InternalError",
            ),
            Self::Failure(f) => f,
        }
    }
}

/// Fatal worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The bridge transport failed outside of an orderly shutdown
    #[error("bridge error: {0}")]
    Bridge(#[from] tempo_core::bridge::BridgeError),

    /// The bridge handed the worker a task it cannot represent
    #[error("unexpected task from bridge: {0}")]
    UnexpectedTask(String),
}
