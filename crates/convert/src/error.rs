//! Conversion errors

/// Errors from the converter pipeline
#[derive(Debug, thiserror::Error)]
pub enum DataConverterError {
    /// No encoding converter accepted the value
    #[error("no payload converter accepted the value")]
    NoSuitableConverter,

    /// The payload carries no `encoding` metadata
    #[error("payload has no encoding metadata")]
    MissingEncoding,

    /// The payload's encoding tag matches no registered converter
    #[error("unknown payload encoding: {0}")]
    UnknownEncoding(String),

    /// Payload count does not match the expected value arity
    #[error("payload count mismatch: expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// Serde failure while encoding or decoding
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload codec failed; fatal to the enclosing operation
    #[error("codec error: {0}")]
    Codec(String),
}
