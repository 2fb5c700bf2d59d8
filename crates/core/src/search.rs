//! Typed search attributes
//!
//! The value type travels as a tag in payload `metadata["type"]`. Payloads
//! with a missing or unknown tag are silently dropped on ingest.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::{Payload, METADATA_ENCODING, METADATA_TYPE};

const JSON_ENCODING: &[u8] = b"json/plain";

/// A typed search attribute value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SearchAttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    DateTime(DateTime<Utc>),
    Keyword(String),
    Text(String),
    KeywordList(Vec<String>),
}

impl SearchAttributeValue {
    /// The wire type tag for this value
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Double(_) => "Double",
            Self::DateTime(_) => "Datetime",
            Self::Keyword(_) => "Keyword",
            Self::Text(_) => "Text",
            Self::KeywordList(_) => "KeywordList",
        }
    }

    /// Encode to a payload carrying the type tag
    pub fn to_payload(&self) -> Payload {
        let data = match self {
            Self::Bool(v) => serde_json::to_vec(v),
            Self::Int(v) => serde_json::to_vec(v),
            Self::Double(v) => serde_json::to_vec(v),
            Self::DateTime(v) => serde_json::to_vec(v),
            Self::Keyword(v) | Self::Text(v) => serde_json::to_vec(v),
            Self::KeywordList(v) => serde_json::to_vec(v),
        }
        .unwrap_or_default();

        let mut payload = Payload {
            metadata: HashMap::new(),
            data,
        };
        payload
            .metadata
            .insert(METADATA_ENCODING.to_string(), JSON_ENCODING.to_vec());
        payload.metadata.insert(
            METADATA_TYPE.to_string(),
            self.type_tag().as_bytes().to_vec(),
        );
        payload
    }

    /// Decode from a payload; `None` when the type tag is missing, unknown,
    /// or the data does not parse as the tagged type
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let tag = payload
            .metadata
            .get(METADATA_TYPE)
            .and_then(|v| std::str::from_utf8(v).ok())?;

        let data = &payload.data;
        match tag {
            "Bool" => serde_json::from_slice(data).ok().map(Self::Bool),
            "Int" => serde_json::from_slice(data).ok().map(Self::Int),
            "Double" => serde_json::from_slice(data).ok().map(Self::Double),
            "Datetime" => serde_json::from_slice(data).ok().map(Self::DateTime),
            "Keyword" => serde_json::from_slice(data).ok().map(Self::Keyword),
            "Text" => serde_json::from_slice(data).ok().map(Self::Text),
            "KeywordList" => serde_json::from_slice(data).ok().map(Self::KeywordList),
            _ => None,
        }
    }
}

/// Encode a typed attribute map to wire payloads
pub fn encode_search_attributes(
    attributes: &HashMap<String, SearchAttributeValue>,
) -> HashMap<String, Payload> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.to_payload()))
        .collect()
}

/// Decode wire payloads, dropping entries with unknown or missing type tags
pub fn decode_search_attributes(
    payloads: &HashMap<String, Payload>,
) -> HashMap<String, SearchAttributeValue> {
    payloads
        .iter()
        .filter_map(|(k, p)| SearchAttributeValue::from_payload(p).map(|v| (k.clone(), v)))
        .collect()
}
