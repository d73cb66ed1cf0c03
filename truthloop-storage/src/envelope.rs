//! Checksummed envelope around persisted playbook documents.
//!
//! Backends store opaque envelope bytes. Decoding and checksum verification
//! happen on read, so a corrupted entry surfaces as an [`EnvelopeError`]
//! instead of a half-parsed document.

use serde::{Deserialize, Serialize};
use truthloop_core::{PlaybookDocument, StorageError, TruthloopError, TruthloopResult};

/// What actually lands on disk for every playbook version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEnvelope {
    pub document: PlaybookDocument,
    /// Hex SHA-256 of the canonical JSON encoding of `document`.
    pub checksum: String,
}

/// Why envelope bytes could not be turned back into a trusted document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON: {0}")]
    Malformed(String),

    #[error("checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },
}

impl DocumentEnvelope {
    /// Wrap a document, computing its checksum.
    pub fn seal(document: PlaybookDocument) -> TruthloopResult<Self> {
        let checksum = document.checksum().map_err(serialization_error)?;
        Ok(Self { document, checksum })
    }

    pub fn to_bytes(&self) -> TruthloopResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(serialization_error)
    }

    /// Decode bytes and verify the checksum.
    pub fn open(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: DocumentEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        let computed = envelope
            .document
            .checksum()
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if computed != envelope.checksum {
            return Err(EnvelopeError::ChecksumMismatch {
                stored: envelope.checksum,
                computed,
            });
        }
        Ok(envelope)
    }
}

/// Seal a document and encode it in one step.
pub fn encode_document(document: &PlaybookDocument) -> TruthloopResult<Vec<u8>> {
    DocumentEnvelope::seal(document.clone())?.to_bytes()
}

pub(crate) fn serialization_error(e: serde_json::Error) -> TruthloopError {
    TruthloopError::Storage(StorageError::Serialization {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthloop_test_utils::seed_document;

    #[test]
    fn test_open_accepts_sealed_bytes() {
        let doc = seed_document();
        let bytes = encode_document(&doc).unwrap();
        let envelope = DocumentEnvelope::open(&bytes).unwrap();
        assert_eq!(envelope.document, doc);
    }

    #[test]
    fn test_open_detects_tampering() {
        let doc = seed_document();
        let mut envelope = DocumentEnvelope::seal(doc).unwrap();
        envelope.document.detection_rules[0].confidence = 0.99;
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert!(matches!(
            DocumentEnvelope::open(&bytes),
            Err(EnvelopeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(matches!(
            DocumentEnvelope::open(b"{not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
