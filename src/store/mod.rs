//! Vector index abstraction.
//!
//! The [`VectorStore`] trait is the only way the pipeline and the chat
//! orchestrator reach the index, enabling pluggable backends: a
//! Qdrant-compatible REST server in production, a brute-force in-memory
//! store in tests.
//!
//! Implementations must be `Send + Sync` and tolerate concurrent upserts;
//! the harness never assumes any internal index structure.

pub mod memory;
pub mod qdrant;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;

use crate::models::{Chunk, MetadataFilter, ScoredChunk};

/// Abstract vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace chunks by id |
/// | [`similarity_search`](VectorStore::similarity_search) | Top-k chunks for a query text |
/// | [`delete_by_filter`](VectorStore::delete_by_filter) | Remove all chunks matching a metadata predicate |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks, keyed by chunk id.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Return up to `top_k` chunks most similar to `query`, best first,
    /// optionally restricted to chunks matching `filter`.
    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk matching `filter`. Returns how many were removed.
    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<usize>;
}
