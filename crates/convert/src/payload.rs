//! Encoding converters
//!
//! A [`CompositePayloadConverter`] holds an ordered list of encoding
//! converters. Encoding tries each in order; the first that accepts the value
//! wins and stamps `metadata["encoding"]` with its tag. Decoding dispatches
//! on that tag.

use serde::de::DeserializeOwned;
use serde::Serialize;

use tempo_core::payload::Payload;

use crate::error::DataConverterError;

/// Standard encoding tags
pub mod encoding {
    pub const BINARY_NULL: &str = "binary/null";
    pub const BINARY_PLAIN: &str = "binary/plain";
    pub const JSON_PLAIN: &str = "json/plain";
    /// Reserved for protobuf-JSON converters; not registered by default
    pub const JSON_PROTOBUF: &str = "json/protobuf";
    /// Reserved for binary protobuf converters; not registered by default
    pub const BINARY_PROTOBUF: &str = "binary/protobuf";
}

/// A value at the converter boundary
///
/// The typed APIs on [`DataConverter`](crate::DataConverter) render values
/// into this shape before running the converter list.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkValue {
    /// Absence of a value
    Nil,

    /// Raw bytes, passed through untouched
    Bytes(Vec<u8>),

    /// A serde-renderable value
    Json(serde_json::Value),
}

impl SdkValue {
    /// Render a serializable value
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, DataConverterError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Extract into a deserializable type
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, DataConverterError> {
        let json = match self {
            Self::Nil => serde_json::Value::Null,
            Self::Json(v) => v,
            // Raw bytes decode through serde as a byte sequence
            Self::Bytes(b) => serde_json::to_value(b)?,
        };
        Ok(serde_json::from_value(json)?)
    }
}

/// One encoding converter in the ordered list
///
/// Contract: deterministic, no I/O, no clock, no randomness.
pub trait EncodingConverter: Send + Sync {
    /// The tag this converter stamps into `metadata["encoding"]`
    fn encoding(&self) -> &'static str;

    /// Try to encode; `Ok(None)` means this converter does not apply and the
    /// next one is tried
    fn try_to_payload(&self, value: &SdkValue) -> Result<Option<Payload>, DataConverterError>;

    /// Decode a payload previously stamped with this converter's tag
    fn from_payload(&self, payload: &Payload) -> Result<SdkValue, DataConverterError>;
}

/// Encodes the absence of a value as `binary/null`
#[derive(Debug, Default)]
pub struct NullConverter;

impl EncodingConverter for NullConverter {
    fn encoding(&self) -> &'static str {
        encoding::BINARY_NULL
    }

    fn try_to_payload(&self, value: &SdkValue) -> Result<Option<Payload>, DataConverterError> {
        match value {
            SdkValue::Nil | SdkValue::Json(serde_json::Value::Null) => Ok(Some(
                Payload::with_encoding(encoding::BINARY_NULL, vec![]),
            )),
            _ => Ok(None),
        }
    }

    fn from_payload(&self, _payload: &Payload) -> Result<SdkValue, DataConverterError> {
        Ok(SdkValue::Nil)
    }
}

/// Encodes raw bytes as `binary/plain`
#[derive(Debug, Default)]
pub struct BinaryConverter;

impl EncodingConverter for BinaryConverter {
    fn encoding(&self) -> &'static str {
        encoding::BINARY_PLAIN
    }

    fn try_to_payload(&self, value: &SdkValue) -> Result<Option<Payload>, DataConverterError> {
        match value {
            SdkValue::Bytes(data) => Ok(Some(Payload::with_encoding(
                encoding::BINARY_PLAIN,
                data.clone(),
            ))),
            _ => Ok(None),
        }
    }

    fn from_payload(&self, payload: &Payload) -> Result<SdkValue, DataConverterError> {
        Ok(SdkValue::Bytes(payload.data.clone()))
    }
}

/// Encodes any serde value as `json/plain`
#[derive(Debug, Default)]
pub struct JsonConverter;

impl EncodingConverter for JsonConverter {
    fn encoding(&self) -> &'static str {
        encoding::JSON_PLAIN
    }

    fn try_to_payload(&self, value: &SdkValue) -> Result<Option<Payload>, DataConverterError> {
        match value {
            SdkValue::Json(json) => Ok(Some(Payload::with_encoding(
                encoding::JSON_PLAIN,
                serde_json::to_vec(json)?,
            ))),
            _ => Ok(None),
        }
    }

    fn from_payload(&self, payload: &Payload) -> Result<SdkValue, DataConverterError> {
        Ok(SdkValue::Json(serde_json::from_slice(&payload.data)?))
    }
}

/// The ordered converter list with tag-dispatched decoding
pub struct CompositePayloadConverter {
    converters: Vec<Box<dyn EncodingConverter>>,
}

impl Default for CompositePayloadConverter {
    fn default() -> Self {
        Self::new(vec![
            Box::new(NullConverter),
            Box::new(BinaryConverter),
            Box::new(JsonConverter),
        ])
    }
}

impl CompositePayloadConverter {
    /// Build from an ordered converter list
    pub fn new(converters: Vec<Box<dyn EncodingConverter>>) -> Self {
        Self { converters }
    }

    /// Encode a value; the first accepting converter wins
    pub fn to_payload(&self, value: &SdkValue) -> Result<Payload, DataConverterError> {
        for converter in &self.converters {
            if let Some(payload) = converter.try_to_payload(value)? {
                return Ok(payload);
            }
        }
        Err(DataConverterError::NoSuitableConverter)
    }

    /// Decode a payload by its encoding tag
    pub fn from_payload(&self, payload: &Payload) -> Result<SdkValue, DataConverterError> {
        let tag = payload
            .encoding()
            .ok_or(DataConverterError::MissingEncoding)?;

        let converter = self
            .converters
            .iter()
            .find(|c| c.encoding() == tag)
            .ok_or_else(|| DataConverterError::UnknownEncoding(tag.to_string()))?;

        converter.from_payload(payload)
    }
}
