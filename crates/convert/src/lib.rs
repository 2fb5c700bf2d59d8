//! # Tempo converter pipeline
//!
//! Layered conversion between in-memory values/errors and wire payloads:
//!
//! 1. **Encoding converters**: an ordered list tried until one accepts the
//!    value, stamping `metadata["encoding"]` for decode dispatch
//! 2. **Payload codecs**: optional symmetric transforms (e.g. encryption)
//!    applied to every payload after encoding and before decoding
//! 3. **Failure converter**: preserves the typed failure taxonomy across
//!    the wire, optionally hiding message/stack behind the codec
//!
//! The pipeline is lock-free and pure; workers and clients share one
//! [`DataConverter`] per process.

pub mod codec;
pub mod error;
pub mod failure;
pub mod payload;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tempo_core::failure::TemporalFailure;
use tempo_core::payload::{Headers, Payload};

pub use codec::{EncryptionCodec, PayloadCodec};
pub use error::DataConverterError;
pub use failure::{DefaultFailureConverter, FailureConverter};
pub use payload::{
    encoding, BinaryConverter, CompositePayloadConverter, EncodingConverter, JsonConverter,
    NullConverter, SdkValue,
};

/// The assembled three-stage pipeline
#[derive(Clone)]
pub struct DataConverter {
    payload_converter: Arc<CompositePayloadConverter>,
    codecs: Vec<Arc<dyn PayloadCodec>>,
    failure_converter: Arc<dyn FailureConverter>,
}

impl Default for DataConverter {
    fn default() -> Self {
        Self {
            payload_converter: Arc::new(CompositePayloadConverter::default()),
            codecs: vec![],
            failure_converter: Arc::new(DefaultFailureConverter::default()),
        }
    }
}

impl DataConverter {
    /// Replace the encoding converter list
    pub fn with_payload_converter(mut self, converter: CompositePayloadConverter) -> Self {
        self.payload_converter = Arc::new(converter);
        self
    }

    /// Append a codec to the chain (applied last on encode, first on decode)
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    /// Replace the failure converter
    pub fn with_failure_converter(mut self, converter: Arc<dyn FailureConverter>) -> Self {
        self.failure_converter = converter;
        self
    }

    /// Encode a serializable value through converters and codecs
    pub fn to_payload<T: Serialize>(&self, value: &T) -> Result<Payload, DataConverterError> {
        let raw = self.payload_converter.to_payload(&SdkValue::from_serialize(value)?)?;
        let mut encoded = codec::encode_through(&self.codecs, vec![raw])?;
        encoded
            .pop()
            .ok_or_else(|| DataConverterError::Codec("codec dropped payload".to_string()))
    }

    /// Encode raw bytes
    pub fn bytes_to_payload(&self, data: Vec<u8>) -> Result<Payload, DataConverterError> {
        let raw = self.payload_converter.to_payload(&SdkValue::Bytes(data))?;
        let mut encoded = codec::encode_through(&self.codecs, vec![raw])?;
        encoded
            .pop()
            .ok_or_else(|| DataConverterError::Codec("codec dropped payload".to_string()))
    }

    /// Encode the absence of a value
    pub fn nil_payload(&self) -> Result<Payload, DataConverterError> {
        let raw = self.payload_converter.to_payload(&SdkValue::Nil)?;
        let mut encoded = codec::encode_through(&self.codecs, vec![raw])?;
        encoded
            .pop()
            .ok_or_else(|| DataConverterError::Codec("codec dropped payload".to_string()))
    }

    /// Decode one payload into a typed value
    pub fn from_payload<T: DeserializeOwned>(
        &self,
        payload: &Payload,
    ) -> Result<T, DataConverterError> {
        let mut decoded = codec::decode_through(&self.codecs, vec![payload.clone()])?;
        let payload = decoded
            .pop()
            .ok_or_else(|| DataConverterError::Codec("codec dropped payload".to_string()))?;
        self.payload_converter.from_payload(&payload)?.into_typed()
    }

    /// Decode a payload list expected to carry exactly one value
    pub fn from_payloads<T: DeserializeOwned>(
        &self,
        payloads: &[Payload],
    ) -> Result<T, DataConverterError> {
        match payloads {
            [] => {
                // Absent value decodes as nil (e.g. unit-typed inputs)
                SdkValue::Nil.into_typed()
            }
            [payload] => self.from_payload(payload),
            _ => Err(DataConverterError::ArityMismatch {
                expected: 1,
                actual: payloads.len(),
            }),
        }
    }

    /// Decode an optional single-payload result
    pub fn from_optional_payload<T: DeserializeOwned>(
        &self,
        payload: Option<&Payload>,
    ) -> Result<T, DataConverterError> {
        match payload {
            Some(p) => self.from_payload(p),
            None => SdkValue::Nil.into_typed(),
        }
    }

    /// Apply the codec chain to already-encoded payloads (headers on send)
    pub fn encode_payloads(
        &self,
        payloads: Vec<Payload>,
    ) -> Result<Vec<Payload>, DataConverterError> {
        codec::encode_through(&self.codecs, payloads)
    }

    /// Invert the codec chain (headers on receive)
    pub fn decode_payloads(
        &self,
        payloads: Vec<Payload>,
    ) -> Result<Vec<Payload>, DataConverterError> {
        codec::decode_through(&self.codecs, payloads)
    }

    /// Encode header values through the codec chain
    pub fn encode_headers(&self, headers: Headers) -> Result<Headers, DataConverterError> {
        headers
            .into_iter()
            .map(|(k, v)| {
                let mut encoded = codec::encode_through(&self.codecs, vec![v])?;
                let payload = encoded.pop().ok_or_else(|| {
                    DataConverterError::Codec("codec dropped header payload".to_string())
                })?;
                Ok((k, payload))
            })
            .collect()
    }

    /// Decode header values through the codec chain
    pub fn decode_headers(&self, headers: Headers) -> Result<Headers, DataConverterError> {
        headers
            .into_iter()
            .map(|(k, v)| {
                let mut decoded = codec::decode_through(&self.codecs, vec![v])?;
                let payload = decoded.pop().ok_or_else(|| {
                    DataConverterError::Codec("codec dropped header payload".to_string())
                })?;
                Ok((k, payload))
            })
            .collect()
    }

    /// Prepare a failure for the wire
    pub fn failure_to_wire(
        &self,
        failure: TemporalFailure,
    ) -> Result<TemporalFailure, DataConverterError> {
        self.failure_converter.to_wire(failure, &self.codecs)
    }

    /// Reconstruct a failure from the wire
    pub fn failure_from_wire(
        &self,
        failure: TemporalFailure,
    ) -> Result<TemporalFailure, DataConverterError> {
        self.failure_converter.from_wire(failure, &self.codecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OrderInput {
        order_id: String,
        amount: i64,
    }

    #[test]
    fn test_typed_round_trip() {
        let converter = DataConverter::default();
        let input = OrderInput {
            order_id: "ORDER-12345".to_string(),
            amount: 250,
        };

        let payload = converter.to_payload(&input).unwrap();
        assert_eq!(payload.encoding(), Some(encoding::JSON_PLAIN));

        let decoded: OrderInput = converter.from_payload(&payload).unwrap();
        assert_eq!(input, decoded);
    }

    #[test]
    fn test_round_trip_with_encryption() {
        let converter = DataConverter::default()
            .with_codec(Arc::new(EncryptionCodec::new("k1", &[9u8; 32])));

        let input = OrderInput {
            order_id: "ORDER-12345".to_string(),
            amount: 250,
        };

        let payload = converter.to_payload(&input).unwrap();
        assert_eq!(payload.encoding(), Some(codec::ENCODING_ENCRYPTED));

        let decoded: OrderInput = converter.from_payload(&payload).unwrap();
        assert_eq!(input, decoded);
    }

    #[test]
    fn test_arity_mismatch() {
        let converter = DataConverter::default();
        let p1 = converter.to_payload(&1i32).unwrap();
        let p2 = converter.to_payload(&2i32).unwrap();

        let result: Result<i32, _> = converter.from_payloads(&[p1, p2]);
        assert!(matches!(
            result,
            Err(DataConverterError::ArityMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_empty_payloads_decode_as_unit() {
        let converter = DataConverter::default();
        let _: () = converter.from_payloads(&[]).unwrap();
    }

    #[test]
    fn test_nil_payload_round_trip() {
        let converter = DataConverter::default();
        let payload = converter.nil_payload().unwrap();
        assert_eq!(payload.encoding(), Some(encoding::BINARY_NULL));
        let _: () = converter.from_payload(&payload).unwrap();
    }

    #[test]
    fn test_headers_through_codec() {
        let converter = DataConverter::default()
            .with_codec(Arc::new(EncryptionCodec::new("k1", &[9u8; 32])));

        let mut headers = Headers::new();
        headers.insert(
            "trace-id".to_string(),
            Payload::with_encoding(encoding::JSON_PLAIN, b"\"abc\"".to_vec()),
        );

        let encoded = converter.encode_headers(headers.clone()).unwrap();
        assert_eq!(
            encoded["trace-id"].encoding(),
            Some(codec::ENCODING_ENCRYPTED)
        );

        let decoded = converter.decode_headers(encoded).unwrap();
        assert_eq!(decoded, headers);
    }
}
