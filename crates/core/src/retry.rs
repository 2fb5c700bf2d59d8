//! Retry policy carried on starts and activity schedules
//!
//! The cluster owns retry scheduling; the SDK only validates and transports
//! the policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ArgumentError;

/// Retry configuration for workflows and activities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub initial_interval: Option<Duration>,

    /// Multiplier applied to the previous interval; must be >= 1
    pub backoff_coefficient: f64,

    /// Cap on the retry interval
    #[serde(default, with = "crate::common::opt_duration_ms")]
    pub maximum_interval: Option<Duration>,

    /// Maximum number of attempts including the first; 0 means unlimited
    pub maximum_attempts: u32,

    /// Application error types that must not be retried
    #[serde(default)]
    pub non_retryable_error_types: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Some(Duration::from_secs(1)),
            backoff_coefficient: 2.0,
            maximum_interval: Some(Duration::from_secs(100)),
            maximum_attempts: 0,
            non_retryable_error_types: vec![],
        }
    }
}

impl RetryPolicy {
    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = Some(interval);
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the maximum retry interval
    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = Some(interval);
        self
    }

    /// Set the maximum number of attempts
    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    /// Add a non-retryable error type
    pub fn with_non_retryable_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_error_types.push(error_type.into());
        self
    }

    /// Validate invariants before the policy is sent to the cluster
    pub fn validate(&self) -> Result<(), ArgumentError> {
        if self.backoff_coefficient < 1.0 {
            return Err(ArgumentError::new(format!(
                "retry policy backoff_coefficient must be >= 1, got {}",
                self.backoff_coefficient
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        RetryPolicy::default().validate().expect("should validate");
    }

    #[test]
    fn test_rejects_backoff_below_one() {
        let policy = RetryPolicy::default().with_backoff_coefficient(0.5);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::default()
            .with_maximum_attempts(3)
            .with_non_retryable_error_type("InsufficientFunds");

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
