//! Ingestion pipeline: uploads and repository analysis into the index.
//!
//! Direct uploads run through a bounded worker pool and are all-or-nothing:
//! any file failing fails the whole job and nothing is registered.
//! Repository analysis walks the checkout sequentially and is best-effort:
//! a file that cannot be parsed is logged and skipped so one bad blob does
//! not sink an entire repo. Both paths write chunks in fixed-size batches
//! with a short delay between batches to avoid saturating the index.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::chunk::split_document;
use crate::config::{ChunkingConfig, IngestConfig};
use crate::fetch::{repo_name_from_url, FetchError, RepoFetcher};
use crate::models::{
    MetadataFilter, META_BATCH_INDEX, META_FILENAME, META_FILE_SIZE, META_KNOWLEDGE,
    META_UPLOAD_TIME,
};
use crate::registry::TagRegistry;
use crate::store::VectorStore;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no files supplied")]
    NoFiles,
    #[error("knowledge tag must not be blank")]
    BlankTag,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether the caller, not the service, caused this failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NoFiles | Self::BlankTag)
    }
}

/// An uploaded file before parsing.
pub struct SourceFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// What an ingestion job accomplished.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct IngestReport {
    /// Files that produced at least one chunk.
    pub files_processed: usize,
    /// Chunks written to the index.
    pub chunk_count: usize,
}

pub struct IngestPipeline {
    store: Arc<dyn VectorStore>,
    registry: TagRegistry,
    fetcher: RepoFetcher,
    chunking: ChunkingConfig,
    ingest: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        registry: TagRegistry,
        fetcher: RepoFetcher,
        chunking: ChunkingConfig,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            store,
            registry,
            fetcher,
            chunking,
            ingest,
        }
    }

    /// Index a batch of uploaded files under `tag`.
    ///
    /// All files must succeed; the tag is registered only afterwards.
    pub async fn ingest(
        &self,
        tag: &str,
        files: Vec<SourceFile>,
    ) -> Result<IngestReport, IngestError> {
        if tag.trim().is_empty() {
            return Err(IngestError::BlankTag);
        }
        if files.is_empty() {
            return Err(IngestError::NoFiles);
        }

        let workers = files.len().min(self.ingest.max_workers.max(1));
        let pool = Arc::new(Semaphore::new(workers));

        let jobs = files.into_iter().map(|file| {
            let pool = Arc::clone(&pool);
            async move {
                let _permit = pool
                    .acquire()
                    .await
                    .context("ingest worker pool closed")?;
                self.process_file(tag, file).await
            }
        });

        let mut report = IngestReport::default();
        for result in join_all(jobs).await {
            let chunks = result?;
            if chunks > 0 {
                report.files_processed += 1;
            }
            report.chunk_count += chunks;
        }

        self.registry.add_if_absent(tag).await?;
        tracing::info!(
            tag,
            files = report.files_processed,
            chunks = report.chunk_count,
            "upload ingestion complete"
        );
        Ok(report)
    }

    /// Clone a git repository and index every regular file under the tag
    /// derived from the URL. Per-file failures are logged and skipped.
    pub async fn ingest_repository(&self, repo_url: &str) -> Result<IngestReport, IngestError> {
        let tag = repo_name_from_url(repo_url)?;
        let checkout = self.fetcher.clone_repo(repo_url).await?;

        let excludes = repo_excludes().map_err(anyhow::Error::from)?;
        let mut report = IngestReport::default();

        for entry in WalkDir::new(checkout.path()) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::error!(repo_url, "walk error, skipping entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(checkout.path())
                .unwrap_or(entry.path());
            let rel_str = relative.to_string_lossy().to_string();
            if excludes.is_match(&rel_str) {
                continue;
            }

            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(file = %rel_str, "read failed, skipping: {e}");
                    continue;
                }
            };
            let file = SourceFile {
                filename: rel_str.clone(),
                bytes,
            };
            match self.process_file(&tag, file).await {
                Ok(chunks) => {
                    if chunks > 0 {
                        report.files_processed += 1;
                    }
                    report.chunk_count += chunks;
                }
                Err(e) => {
                    tracing::error!(file = %rel_str, "ingest failed, skipping: {e:#}");
                }
            }
        }

        // Explicit: the scratch checkout is removed before the tag becomes
        // visible, whatever the walk encountered.
        drop(checkout);

        self.registry.add_if_absent(&tag).await?;
        tracing::info!(
            repo_url,
            %tag,
            files = report.files_processed,
            chunks = report.chunk_count,
            "repository ingestion complete"
        );
        Ok(report)
    }

    /// Remove every chunk under `tag` and drop the tag from the registry.
    pub async fn delete_tag(&self, tag: &str) -> Result<usize, IngestError> {
        if tag.trim().is_empty() {
            return Err(IngestError::BlankTag);
        }
        let removed = self
            .store
            .delete_by_filter(&MetadataFilter::equals(META_KNOWLEDGE, tag))
            .await?;
        self.registry.remove(tag).await?;
        tracing::info!(tag, removed, "deleted knowledge tag");
        Ok(removed)
    }

    /// Parse, chunk, and upsert one file. Returns the number of chunks
    /// written; zero when the file decodes to no text.
    async fn process_file(&self, tag: &str, file: SourceFile) -> Result<usize, anyhow::Error> {
        let file_size = file.bytes.len();
        let documents = crate::extract::parse_bytes(&file.filename, &file.bytes)
            .with_context(|| format!("Failed to parse {}", file.filename))?;
        if documents.is_empty() {
            tracing::warn!(file = %file.filename, "no text extracted, skipping");
            return Ok(0);
        }

        let upload_time = chrono::Utc::now().to_rfc3339();
        let mut written = 0usize;

        for mut doc in documents {
            doc.metadata
                .insert(META_KNOWLEDGE.to_string(), tag.to_string());
            doc.metadata
                .insert(META_FILENAME.to_string(), file.filename.clone());
            doc.metadata
                .insert(META_FILE_SIZE.to_string(), file_size.to_string());
            doc.metadata
                .insert(META_UPLOAD_TIME.to_string(), upload_time.clone());

            let mut chunks = split_document(&doc, &self.chunking);
            let batch_size = self.ingest.upload_batch_size.max(1);
            let batch_total = chunks.chunks(batch_size).count();

            for (batch_idx, batch) in chunks.chunks_mut(batch_size).enumerate() {
                for chunk in batch.iter_mut() {
                    chunk
                        .metadata
                        .insert(META_BATCH_INDEX.to_string(), batch_idx.to_string());
                }
                self.store
                    .upsert(batch)
                    .await
                    .with_context(|| format!("Failed to index {}", file.filename))?;
                written += batch.len();
                if batch_idx + 1 < batch_total {
                    tokio::time::sleep(Duration::from_millis(self.ingest.batch_delay_ms)).await;
                }
            }
        }
        Ok(written)
    }
}

fn repo_excludes() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new("**/.git/**")?);
    builder.add(Glob::new(".git/**")?);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_excludes_match_git_internals() {
        let set = repo_excludes().unwrap();
        assert!(set.is_match(".git/objects/ab/cdef"));
        assert!(set.is_match("sub/.git/config"));
        assert!(!set.is_match("src/git_helpers.rs"));
    }
}
