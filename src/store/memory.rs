//! In-memory [`VectorStore`] implementation for tests and standalone runs.
//!
//! Holds chunks in a `Vec` behind `std::sync::RwLock`. Scoring is
//! deterministic term overlap: the number of distinct lowercased query
//! terms contained in the chunk text. No embedding model is involved, so
//! tests can assert on ranking without network access.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, MetadataFilter, ScoredChunk};

use super::VectorStore;

/// Brute-force store used by tests.
#[derive(Default)]
pub struct MemoryVectorStore {
    chunks: RwLock<Vec<Chunk>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently held.
    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn term_overlap(query: &str, text: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let text_lower = text.to_lowercase();
    let mut terms: Vec<&str> = query_lower.split_whitespace().collect();
    terms.sort_unstable();
    terms.dedup();
    terms.iter().filter(|t| text_lower.contains(**t)).count() as f64
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let mut stored = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        for chunk in chunks {
            stored.retain(|c| c.id != chunk.id);
            stored.push(chunk.clone());
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<ScoredChunk> = stored
            .iter()
            .filter(|c| filter.map_or(true, |f| f.matches(&c.metadata)))
            .map(|c| ScoredChunk {
                chunk: c.clone(),
                score: term_overlap(query, &c.text),
            })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut stored = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        let before = stored.len();
        stored.retain(|c| !filter.matches(&c.metadata));
        Ok(before - stored.len())
    }
}
