//! Failure conversion
//!
//! Transforms failures between their local form and the wire form that
//! travels through history. The transformation is a retraction: a round trip
//! preserves every field except cosmetic stack-trace normalization.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tempo_core::failure::{FailureInfo, TemporalFailure, ENCODED_FAILURE_MESSAGE};
use tempo_core::payload::Payload;

use crate::codec::{decode_through, encode_through, PayloadCodec};
use crate::error::DataConverterError;
use crate::payload::encoding;

/// The attributes moved into `encoded_attributes` when common-attribute
/// encoding is enabled
#[derive(Debug, Serialize, Deserialize)]
struct EncodedAttributes {
    message: String,
    #[serde(default)]
    stack_trace: String,
}

/// Converts failures to and from their wire form
pub trait FailureConverter: Send + Sync {
    /// Prepare a failure for the wire, running every embedded payload through
    /// the codec chain
    fn to_wire(
        &self,
        failure: TemporalFailure,
        codecs: &[Arc<dyn PayloadCodec>],
    ) -> Result<TemporalFailure, DataConverterError>;

    /// Invert [`FailureConverter::to_wire`]
    fn from_wire(
        &self,
        failure: TemporalFailure,
        codecs: &[Arc<dyn PayloadCodec>],
    ) -> Result<TemporalFailure, DataConverterError>;
}

/// The standard failure converter
#[derive(Debug, Default)]
pub struct DefaultFailureConverter {
    /// Move `message` and `stack_trace` into `encoded_attributes`, replacing
    /// the plaintext message with the encoded-failure sentinel
    pub encode_common_attributes: bool,
}

impl DefaultFailureConverter {
    /// A converter that hides message and stack trace behind the codec
    pub fn with_encoded_attributes() -> Self {
        Self {
            encode_common_attributes: true,
        }
    }

    fn encode_payloads(
        codecs: &[Arc<dyn PayloadCodec>],
        payloads: Vec<Payload>,
    ) -> Result<Vec<Payload>, DataConverterError> {
        if payloads.is_empty() {
            return Ok(payloads);
        }
        encode_through(codecs, payloads)
    }

    fn decode_payloads(
        codecs: &[Arc<dyn PayloadCodec>],
        payloads: Vec<Payload>,
    ) -> Result<Vec<Payload>, DataConverterError> {
        if payloads.is_empty() {
            return Ok(payloads);
        }
        decode_through(codecs, payloads)
    }
}

impl FailureConverter for DefaultFailureConverter {
    fn to_wire(
        &self,
        mut failure: TemporalFailure,
        codecs: &[Arc<dyn PayloadCodec>],
    ) -> Result<TemporalFailure, DataConverterError> {
        if self.encode_common_attributes && failure.encoded_attributes.is_none() {
            let attributes = EncodedAttributes {
                message: std::mem::replace(
                    &mut failure.message,
                    ENCODED_FAILURE_MESSAGE.to_string(),
                ),
                stack_trace: std::mem::take(&mut failure.stack_trace),
            };
            let payload = Payload::with_encoding(
                encoding::JSON_PLAIN,
                serde_json::to_vec(&attributes)?,
            );
            failure.encoded_attributes = Some(payload);
        }

        if let Some(attrs) = failure.encoded_attributes.take() {
            let mut encoded = Self::encode_payloads(codecs, vec![attrs])?;
            failure.encoded_attributes = encoded.pop();
        }

        failure.info = match failure.info {
            FailureInfo::Application {
                details,
                error_type,
                non_retryable,
                next_retry_delay,
            } => FailureInfo::Application {
                details: Self::encode_payloads(codecs, details)?,
                error_type,
                non_retryable,
                next_retry_delay,
            },
            FailureInfo::Cancelled { details } => FailureInfo::Cancelled {
                details: Self::encode_payloads(codecs, details)?,
            },
            FailureInfo::Terminated { details } => FailureInfo::Terminated {
                details: Self::encode_payloads(codecs, details)?,
            },
            FailureInfo::Timeout {
                timeout_type,
                last_heartbeat_details,
            } => FailureInfo::Timeout {
                timeout_type,
                last_heartbeat_details: Self::encode_payloads(codecs, last_heartbeat_details)?,
            },
            info => info,
        };

        if let Some(cause) = failure.cause.take() {
            failure.cause = Some(Box::new(self.to_wire(*cause, codecs)?));
        }

        Ok(failure)
    }

    fn from_wire(
        &self,
        mut failure: TemporalFailure,
        codecs: &[Arc<dyn PayloadCodec>],
    ) -> Result<TemporalFailure, DataConverterError> {
        if let Some(attrs) = failure.encoded_attributes.take() {
            let mut decoded = Self::decode_payloads(codecs, vec![attrs])?;
            let attrs = decoded.pop().ok_or_else(|| {
                DataConverterError::Codec("encoded attributes vanished in codec".to_string())
            })?;
            if failure.message == ENCODED_FAILURE_MESSAGE {
                let restored: EncodedAttributes = serde_json::from_slice(&attrs.data)?;
                failure.message = restored.message;
                failure.stack_trace = restored.stack_trace;
            } else {
                failure.encoded_attributes = Some(attrs);
            }
        }

        failure.info = match failure.info {
            FailureInfo::Application {
                details,
                error_type,
                non_retryable,
                next_retry_delay,
            } => FailureInfo::Application {
                details: Self::decode_payloads(codecs, details)?,
                error_type,
                non_retryable,
                next_retry_delay,
            },
            FailureInfo::Cancelled { details } => FailureInfo::Cancelled {
                details: Self::decode_payloads(codecs, details)?,
            },
            FailureInfo::Terminated { details } => FailureInfo::Terminated {
                details: Self::decode_payloads(codecs, details)?,
            },
            FailureInfo::Timeout {
                timeout_type,
                last_heartbeat_details,
            } => FailureInfo::Timeout {
                timeout_type,
                last_heartbeat_details: Self::decode_payloads(codecs, last_heartbeat_details)?,
            },
            info => info,
        };

        if let Some(cause) = failure.cause.take() {
            failure.cause = Some(Box::new(self.from_wire(*cause, codecs)?));
        }

        Ok(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncryptionCodec;

    fn sample_failure() -> TemporalFailure {
        TemporalFailure::application("payment declined", "InsufficientFunds")
            .non_retryable()
            .with_cause(TemporalFailure::cancelled("inner cancel"))
    }

    #[test]
    fn test_plain_round_trip_is_identity() {
        let converter = DefaultFailureConverter::default();
        let failure = sample_failure();

        let wire = converter.to_wire(failure.clone(), &[]).unwrap();
        let back = converter.from_wire(wire, &[]).unwrap();
        assert_eq!(failure, back);
    }

    #[test]
    fn test_encoded_attributes_hide_message() {
        let converter = DefaultFailureConverter::with_encoded_attributes();
        let wire = converter.to_wire(sample_failure(), &[]).unwrap();

        assert_eq!(wire.message, ENCODED_FAILURE_MESSAGE);
        assert!(wire.encoded_attributes.is_some());
        // The cause is encoded too
        assert_eq!(
            wire.cause.as_ref().unwrap().message,
            ENCODED_FAILURE_MESSAGE
        );
    }

    #[test]
    fn test_encoded_attributes_restore_on_decode() {
        let converter = DefaultFailureConverter::with_encoded_attributes();
        let original = sample_failure();

        let wire = converter.to_wire(original.clone(), &[]).unwrap();
        let back = converter.from_wire(wire, &[]).unwrap();
        assert_eq!(back.message, original.message);
        assert!(back.encoded_attributes.is_none());
    }

    #[test]
    fn test_wire_form_is_stable() {
        // to_wire(from_wire(to_wire(f))) == to_wire(f), without codecs
        let converter = DefaultFailureConverter::with_encoded_attributes();
        let wire1 = converter.to_wire(sample_failure(), &[]).unwrap();
        let back = converter.from_wire(wire1.clone(), &[]).unwrap();
        let wire2 = converter.to_wire(back, &[]).unwrap();
        assert_eq!(wire1, wire2);
    }

    #[test]
    fn test_encrypted_attributes_round_trip() {
        let converter = DefaultFailureConverter::with_encoded_attributes();
        let codecs: Vec<Arc<dyn PayloadCodec>> =
            vec![Arc::new(EncryptionCodec::new("k", &[3u8; 32]))];

        let original = sample_failure();
        let wire = converter.to_wire(original.clone(), &codecs).unwrap();
        let back = converter.from_wire(wire, &codecs).unwrap();
        assert_eq!(back.message, original.message);
    }
}
