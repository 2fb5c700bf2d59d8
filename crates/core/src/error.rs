//! Cross-crate error primitives

use serde::{Deserialize, Serialize};

/// A caller supplied an invalid argument
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid argument: {0}")]
pub struct ArgumentError(String);

impl ArgumentError {
    /// Create an argument error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Status kinds of the RPC transport, projected from the gRPC status space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Unavailable,
    Unimplemented,
    Internal,
}

/// An error surfaced by the cluster transport
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("rpc error ({kind:?}): {message}")]
pub struct RpcError {
    /// Projected status kind
    pub kind: RpcErrorKind,

    /// Status message from the server
    pub message: String,
}

impl RpcError {
    /// Create an RPC error
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a not-found status
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::NotFound, message)
    }

    /// Shorthand for an invalid-argument status
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::InvalidArgument, message)
    }

    /// Shorthand for an already-exists status
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::AlreadyExists, message)
    }

    /// Shorthand for a deadline-exceeded status
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::DeadlineExceeded, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::not_found("no such workflow");
        assert!(err.to_string().contains("no such workflow"));
        assert_eq!(err.kind, RpcErrorKind::NotFound);
    }
}
