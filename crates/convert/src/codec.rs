//! Payload codecs
//!
//! A codec transforms whole payloads after encoding and before decoding.
//! Codecs must be bijections: decode(encode(p)) == p, non-codec metadata is
//! preserved, and any metadata a codec adds it must remove again.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};

use tempo_core::payload::Payload;

use crate::error::DataConverterError;

/// Metadata key naming the codec that wrapped a payload
pub const METADATA_CODEC: &str = "codec";

/// Metadata key carrying the encryption key id
pub const METADATA_ENCRYPTION_KEY_ID: &str = "encryption-key-id";

/// Encoding tag for encrypted payloads
pub const ENCODING_ENCRYPTED: &str = "binary/encrypted";

/// A symmetric transform applied to every payload crossing the wire
pub trait PayloadCodec: Send + Sync {
    /// Transform payloads outbound, after the encoding converter ran
    fn encode(&self, payloads: Vec<Payload>) -> Result<Vec<Payload>, DataConverterError>;

    /// Invert [`PayloadCodec::encode`]
    fn decode(&self, payloads: Vec<Payload>) -> Result<Vec<Payload>, DataConverterError>;
}

/// AES-256-GCM payload encryption
///
/// The whole inner payload (metadata included) is serialized and sealed; the
/// nonce is prepended to the ciphertext. Unencrypted payloads pass through
/// decode untouched, so a codec can be introduced on a live task queue.
pub struct EncryptionCodec {
    key_id: String,
    cipher: Aes256Gcm,
}

impl EncryptionCodec {
    /// Create a codec from a 32-byte key
    pub fn new(key_id: impl Into<String>, key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            key_id: key_id.into(),
            cipher: Aes256Gcm::new(key),
        }
    }

    fn seal(&self, payload: &Payload) -> Result<Vec<u8>, DataConverterError> {
        let plaintext = serde_json::to_vec(payload)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| DataConverterError::Codec(format!("encryption failed: {e}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Payload, DataConverterError> {
        if sealed.len() < 12 {
            return Err(DataConverterError::Codec(
                "encrypted payload shorter than nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| DataConverterError::Codec(format!("decryption failed: {e}")))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl PayloadCodec for EncryptionCodec {
    fn encode(&self, payloads: Vec<Payload>) -> Result<Vec<Payload>, DataConverterError> {
        payloads
            .into_iter()
            .map(|payload| {
                let data = self.seal(&payload)?;
                let mut wrapped = Payload::with_encoding(ENCODING_ENCRYPTED, data);
                wrapped.metadata.insert(
                    METADATA_CODEC.to_string(),
                    b"encryption".to_vec(),
                );
                wrapped.metadata.insert(
                    METADATA_ENCRYPTION_KEY_ID.to_string(),
                    self.key_id.as_bytes().to_vec(),
                );
                Ok(wrapped)
            })
            .collect()
    }

    fn decode(&self, payloads: Vec<Payload>) -> Result<Vec<Payload>, DataConverterError> {
        payloads
            .into_iter()
            .map(|payload| {
                if payload.encoding() != Some(ENCODING_ENCRYPTED) {
                    return Ok(payload);
                }
                let key_id = payload
                    .metadata
                    .get(METADATA_ENCRYPTION_KEY_ID)
                    .and_then(|v| std::str::from_utf8(v).ok());
                if key_id != Some(self.key_id.as_str()) {
                    return Err(DataConverterError::Codec(format!(
                        "payload sealed with unknown key id {:?}",
                        key_id.unwrap_or("<missing>")
                    )));
                }
                self.open(&payload.data)
            })
            .collect()
    }
}

/// Run payloads through a codec chain in order (reverse order on decode)
pub fn encode_through(
    codecs: &[std::sync::Arc<dyn PayloadCodec>],
    mut payloads: Vec<Payload>,
) -> Result<Vec<Payload>, DataConverterError> {
    for codec in codecs {
        payloads = codec.encode(payloads)?;
    }
    Ok(payloads)
}

/// Invert [`encode_through`]
pub fn decode_through(
    codecs: &[std::sync::Arc<dyn PayloadCodec>],
    mut payloads: Vec<Payload>,
) -> Result<Vec<Payload>, DataConverterError> {
    for codec in codecs.iter().rev() {
        payloads = codec.decode(payloads)?;
    }
    Ok(payloads)
}
