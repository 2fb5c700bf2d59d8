//! Wire representation of values

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key identifying the encoding converter that produced a payload
pub const METADATA_ENCODING: &str = "encoding";

/// Metadata key carrying the search attribute type tag
pub const METADATA_TYPE: &str = "type";

/// A value on the wire: raw bytes plus a metadata map
///
/// Every payload carries at least `metadata["encoding"]`, stamped by the
/// converter that produced it and used to dispatch decoding. Codecs may add
/// further keys (e.g. `"codec"`) and must remove them again on decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    /// Metadata map; values are raw bytes
    #[serde(default)]
    pub metadata: HashMap<String, Vec<u8>>,

    /// The encoded value
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Payload {
    /// Create a payload with a single `encoding` metadata entry
    pub fn with_encoding(encoding: &str, data: Vec<u8>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(METADATA_ENCODING.to_string(), encoding.as_bytes().to_vec());
        Self { metadata, data }
    }

    /// The `encoding` metadata value, if present and valid UTF-8
    pub fn encoding(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_ENCODING)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Headers travelling with start/signal/query/update requests
pub type Headers = HashMap<String, Payload>;

/// Memo fields attached to a workflow execution
pub type Memo = HashMap<String, Payload>;
