//! Core data models used throughout RAG Harness.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline. Metadata is a flat
//! string-to-string map; the well-known keys are exposed as constants so the
//! pipeline, store, and orchestrator agree on spelling.

use std::collections::BTreeMap;

use uuid::Uuid;

/// Metadata key holding the knowledge tag a chunk belongs to.
pub const META_KNOWLEDGE: &str = "knowledge";
/// Metadata key holding the conversation id of a memory turn.
pub const META_HISTORY: &str = "historychat";
/// Original filename of the uploaded source.
pub const META_FILENAME: &str = "filename";
/// Size of the uploaded source in bytes.
pub const META_FILE_SIZE: &str = "fileSize";
/// RFC 3339 timestamp of when the source was ingested.
pub const META_UPLOAD_TIME: &str = "uploadTime";
/// Char offset where a coarse window starts in the source document.
pub const META_CHUNK_START: &str = "chunkStart";
/// Char offset one past the end of a coarse window.
pub const META_CHUNK_END: &str = "chunkEnd";
/// Zero-based index of the upsert batch a chunk was written in.
pub const META_BATCH_INDEX: &str = "batchIndex";
/// Fallback text encoding the source was decoded with.
pub const META_ENCODING: &str = "encoding";

/// A parsed document before chunking.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// An indexable fragment of a document.
///
/// Inherits the parent document's metadata, possibly extended with
/// chunk-level keys such as [`META_CHUNK_START`] or [`META_BATCH_INDEX`].
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            metadata,
        }
    }
}

/// A chunk paired with its similarity score, highest first.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Metadata predicate accepted by the vector index.
///
/// Equality on a single key is the only form the retrieval paths need
/// (`knowledge == tag`, `historychat == memory_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    Equals { key: String, value: String },
}

impl MetadataFilter {
    pub fn equals(key: &str, value: impl Into<String>) -> Self {
        Self::Equals {
            key: key.to_string(),
            value: value.into(),
        }
    }

    /// Whether a chunk's metadata satisfies this filter.
    pub fn matches(&self, metadata: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { key, value } => metadata.get(key).is_some_and(|v| v == value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_equality() {
        let doc = Document::new("hi").with_metadata(META_KNOWLEDGE, "docs");
        let filter = MetadataFilter::equals(META_KNOWLEDGE, "docs");
        assert!(filter.matches(&doc.metadata));
        assert!(!MetadataFilter::equals(META_KNOWLEDGE, "other").matches(&doc.metadata));
        assert!(!MetadataFilter::equals(META_HISTORY, "docs").matches(&doc.metadata));
    }

    #[test]
    fn test_chunk_ids_unique() {
        let a = Chunk::new("x", BTreeMap::new());
        let b = Chunk::new("x", BTreeMap::new());
        assert_ne!(a.id, b.id);
    }
}
