//! Qdrant-backed [`VectorStore`] over the REST API.
//!
//! Talks plain JSON via reqwest so any Qdrant-compatible server works.
//! Chunk text is embedded through the configured [`Embedder`] on write and
//! on query; metadata keys are stored flat in the point payload next to a
//! reserved `text` key, which keeps the equality filter a one-key match.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::VectorConfig;
use crate::embedding::Embedder;
use crate::models::{Chunk, MetadataFilter, ScoredChunk};

use super::VectorStore;

/// Payload key holding the chunk text. Metadata may not use this key.
const PAYLOAD_TEXT: &str = "text";

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl QdrantStore {
    pub fn new(config: &VectorConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            embedder,
        })
    }

    /// Create the collection if it does not exist yet. Safe to call on
    /// every startup.
    pub async fn ensure_collection(&self) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let existing = self.client.get(&url).send().await?;
        if existing.status().is_success() {
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": {
                "size": self.embedder.dims(),
                "distance": "Cosine",
            }
        });
        let resp = self.client.put(&url).json(&body).send().await?;
        // A concurrent creator may have won the race.
        if !resp.status().is_success() && resp.status().as_u16() != 409 {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Failed to create collection {}: {} {}", self.collection, status, text);
        }
        tracing::info!(
            collection = %self.collection,
            model = self.embedder.model_name(),
            dims = self.embedder.dims(),
            "created vector collection"
        );
        Ok(())
    }

    fn filter_json(filter: &MetadataFilter) -> serde_json::Value {
        match filter {
            MetadataFilter::Equals { key, value } => serde_json::json!({
                "must": [{ "key": key, "match": { "value": value } }]
            }),
        }
    }

    async fn count_matching(&self, filter: &MetadataFilter) -> Result<usize> {
        let url = format!(
            "{}/collections/{}/points/count",
            self.base_url, self.collection
        );
        let body = serde_json::json!({
            "filter": Self::filter_json(filter),
            "exact": true,
        });
        let json: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        json.pointer("/result/count")
            .and_then(|c| c.as_u64())
            .map(|c| c as usize)
            .context("Invalid count response")
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let points: Vec<serde_json::Value> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut payload = serde_json::Map::new();
                payload.insert(
                    PAYLOAD_TEXT.to_string(),
                    serde_json::Value::String(chunk.text.clone()),
                );
                for (k, v) in &chunk.metadata {
                    payload.insert(k.clone(), serde_json::Value::String(v.clone()));
                }
                serde_json::json!({
                    "id": chunk.id,
                    "vector": vector,
                    "payload": payload,
                })
            })
            .collect();

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        self.client
            .put(&url)
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await?
            .error_for_status()
            .context("Qdrant upsert failed")?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Empty embedding response for query")?;

        let mut body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = Self::filter_json(filter);
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let json: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .context("Qdrant search failed")?
            .json()
            .await?;

        let hits = json
            .get("result")
            .and_then(|r| r.as_array())
            .context("Invalid search response: missing result array")?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit
                .get("id")
                .map(|i| match i {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let score = hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            let payload = hit.get("payload").and_then(|p| p.as_object());

            let mut text = String::new();
            let mut metadata = BTreeMap::new();
            if let Some(payload) = payload {
                for (k, v) in payload {
                    let Some(v) = v.as_str() else { continue };
                    if k == PAYLOAD_TEXT {
                        text = v.to_string();
                    } else {
                        metadata.insert(k.clone(), v.to_string());
                    }
                }
            }
            results.push(ScoredChunk {
                chunk: Chunk { id, text, metadata },
                score,
            });
        }
        Ok(results)
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<usize> {
        let count = self.count_matching(filter).await?;
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        self.client
            .post(&url)
            .json(&serde_json::json!({ "filter": Self::filter_json(filter) }))
            .send()
            .await?
            .error_for_status()
            .context("Qdrant delete failed")?;
        Ok(count)
    }
}
