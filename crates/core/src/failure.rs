//! Wire form of typed failures
//!
//! `TemporalFailure` is the serialized error that travels through history and
//! RPC responses. Conversion between SDK error values and this form is a
//! retraction: every field except cosmetic stack-trace normalization survives
//! a round trip.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Sentinel message installed when common attributes are moved into
/// `encoded_attributes`
pub const ENCODED_FAILURE_MESSAGE: &str = "Encoded failure";

/// Why the cluster stopped retrying (or did not)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    #[default]
    Unspecified,
    InProgress,
    NonRetryableFailure,
    Timeout,
    MaximumAttemptsReached,
    RetryPolicyNotSet,
    InternalServerError,
    CancelRequested,
}

/// Which timeout fired
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

/// Variant-specific failure information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureInfo {
    /// An error raised by application code
    Application {
        /// Encoded error details
        #[serde(default)]
        details: Vec<Payload>,

        /// Application-assigned error type, matched against
        /// `non_retryable_error_types`
        error_type: String,

        /// When set, retry policy is bypassed entirely
        non_retryable: bool,

        /// Server-honored override of the next retry delay
        #[serde(default, with = "crate::common::opt_duration_ms")]
        next_retry_delay: Option<Duration>,
    },

    /// Cooperative cancellation
    Cancelled {
        #[serde(default)]
        details: Vec<Payload>,
    },

    /// Forceful termination
    Terminated {
        #[serde(default)]
        details: Vec<Payload>,
    },

    /// A timeout fired
    Timeout {
        timeout_type: TimeoutType,

        /// Heartbeat details recorded before the timeout, if any
        #[serde(default)]
        last_heartbeat_details: Vec<Payload>,
    },

    /// An activity failed; the underlying error is in `cause`
    Activity {
        scheduled_event_id: i64,
        started_event_id: i64,
        identity: String,
        activity_type: String,
        activity_id: String,
        retry_state: RetryState,
    },

    /// A child workflow failed; the underlying error is in `cause`
    ChildWorkflow {
        namespace: String,
        workflow_id: String,
        run_id: String,
        workflow_type: String,
        retry_state: RetryState,
    },
}

/// A typed failure with an optional cause chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalFailure {
    /// Human-readable message (or the encoded-failure sentinel)
    pub message: String,

    /// Originating SDK identifier
    #[serde(default)]
    pub source: String,

    /// Captured stack trace, possibly empty
    #[serde(default)]
    pub stack_trace: String,

    /// Message and stack trace moved here when common-attribute encoding is on
    #[serde(default)]
    pub encoded_attributes: Option<Payload>,

    /// Underlying failure, forming a chain
    #[serde(default)]
    pub cause: Option<Box<TemporalFailure>>,

    /// Variant-specific information
    pub info: FailureInfo,
}

impl TemporalFailure {
    /// Build an application failure with the given message and error type
    pub fn application(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: crate::SDK_SOURCE.to_string(),
            stack_trace: String::new(),
            encoded_attributes: None,
            cause: None,
            info: FailureInfo::Application {
                details: vec![],
                error_type: error_type.into(),
                non_retryable: false,
                next_retry_delay: None,
            },
        }
    }

    /// Build a cancellation failure
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: crate::SDK_SOURCE.to_string(),
            stack_trace: String::new(),
            encoded_attributes: None,
            cause: None,
            info: FailureInfo::Cancelled { details: vec![] },
        }
    }

    /// Mark an application failure as non-retryable; no-op for other variants
    pub fn non_retryable(mut self) -> Self {
        if let FailureInfo::Application { non_retryable, .. } = &mut self.info {
            *non_retryable = true;
        }
        self
    }

    /// Attach a cause
    pub fn with_cause(mut self, cause: TemporalFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Whether this failure (at the top level) represents cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self.info, FailureInfo::Cancelled { .. })
    }

    /// Walk the cause chain, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &TemporalFailure> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.cause.as_deref();
            Some(current)
        })
    }
}

impl std::fmt::Display for TemporalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
