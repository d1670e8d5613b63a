//! End-to-end pipeline tests against in-memory backends.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use rag_harness::config::{ChunkingConfig, FetchConfig, IngestConfig};
use rag_harness::fetch::{CloneBackend, CloneError, FetchError, RepoFetcher};
use rag_harness::ingest::{IngestError, IngestPipeline, SourceFile};
use rag_harness::models::{MetadataFilter, META_FILENAME, META_KNOWLEDGE};
use rag_harness::registry::{MemoryTagStore, TagRegistry};
use rag_harness::store::{MemoryVectorStore, VectorStore};

/// Clone backend that fails a fixed number of times before producing a
/// small working tree.
struct FlakyClone {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyClone {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CloneBackend for FlakyClone {
    async fn clone_into(&self, _url: &str, dest: &Path) -> Result<(), CloneError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CloneError::Failed("Connection reset by peer".to_string()));
        }
        std::fs::create_dir_all(dest.join(".git"))?;
        std::fs::write(dest.join(".git/config"), "[core]\n")?;
        std::fs::write(dest.join("README.md"), "widget assembly depends on gears\n")?;
        std::fs::write(dest.join("notes.txt"), "gears mesh with sprockets\n")?;
        std::fs::write(dest.join("broken.pdf"), b"not a pdf")?;
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryVectorStore>,
    registry: TagRegistry,
    pipeline: IngestPipeline,
    scratch_root: tempfile::TempDir,
}

fn harness(clone_failures: u32, max_attempts: u32) -> Harness {
    let store = Arc::new(MemoryVectorStore::new());
    let registry = TagRegistry::new(Arc::new(MemoryTagStore::new()));
    let scratch_root = tempfile::TempDir::new().unwrap();
    let fetch_config = FetchConfig {
        scratch_root: scratch_root.path().to_path_buf(),
        max_attempts,
        retry_delay_secs: 0,
    };
    let fetcher =
        RepoFetcher::with_backend(&fetch_config, Box::new(FlakyClone::new(clone_failures)));
    let pipeline = IngestPipeline::new(
        store.clone() as Arc<dyn VectorStore>,
        registry.clone(),
        fetcher,
        ChunkingConfig::default(),
        IngestConfig {
            batch_delay_ms: 0,
            ..Default::default()
        },
    );
    Harness {
        store,
        registry,
        pipeline,
        scratch_root,
    }
}

fn text_file(name: &str, body: &str) -> SourceFile {
    SourceFile {
        filename: name.to_string(),
        bytes: body.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn upload_indexes_files_and_registers_tag_once() {
    let h = harness(0, 3);
    let report = h
        .pipeline
        .ingest(
            "docs",
            vec![
                text_file("deploy.md", "deploy the service with docker compose"),
                text_file("backup.md", "nightly backups go to object storage"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.files_processed, 2);
    assert_eq!(report.chunk_count, 2);
    assert_eq!(h.registry.list().await.unwrap(), vec!["docs".to_string()]);

    let filter = MetadataFilter::equals(META_KNOWLEDGE, "docs");
    let hits = h
        .store
        .similarity_search("docker compose deploy", 5, Some(&filter))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].chunk.text.contains("docker compose"));
    assert_eq!(hits[0].chunk.metadata[META_FILENAME], "deploy.md");

    // Re-uploading under the same tag must not duplicate the registry entry.
    h.pipeline
        .ingest("docs", vec![text_file("more.md", "more content here")])
        .await
        .unwrap();
    assert_eq!(h.registry.list().await.unwrap(), vec!["docs".to_string()]);
}

#[tokio::test]
async fn empty_upload_is_a_client_error() {
    let h = harness(0, 3);
    let err = h.pipeline.ingest("docs", Vec::new()).await.unwrap_err();
    assert!(matches!(err, IngestError::NoFiles));
    assert!(err.is_client_error());
    assert!(h.registry.list().await.unwrap().is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn blank_tag_is_a_client_error() {
    let h = harness(0, 3);
    let err = h
        .pipeline
        .ingest("  ", vec![text_file("a.txt", "text")])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::BlankTag));
}

#[tokio::test]
async fn unreadable_file_yields_zero_chunks_without_failing_the_job() {
    let h = harness(0, 3);
    let report = h
        .pipeline
        .ingest(
            "docs",
            vec![
                text_file("ok.md", "readable content"),
                SourceFile {
                    filename: "blank.txt".to_string(),
                    bytes: b"   \n".to_vec(),
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.chunk_count, 1);
}

#[tokio::test]
async fn failing_file_fails_the_whole_upload_and_registers_nothing() {
    let h = harness(0, 3);
    let err = h
        .pipeline
        .ingest(
            "docs",
            vec![
                text_file("ok.md", "perfectly fine content"),
                SourceFile {
                    filename: "broken.pdf".to_string(),
                    bytes: b"not a pdf".to_vec(),
                },
            ],
        )
        .await
        .unwrap_err();

    assert!(!err.is_client_error());
    assert!(err.to_string().contains("broken.pdf"));
    // All-or-nothing: the tag stays unregistered.
    assert!(h.registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn repository_walk_skips_unparseable_files() {
    let h = harness(0, 3);
    let report = h
        .pipeline
        .ingest_repository("https://git.example.com/acme/widgets.git")
        .await
        .unwrap();

    // The planted broken.pdf is logged and skipped; the rest still lands.
    assert_eq!(report.files_processed, 2);
    assert_eq!(h.registry.list().await.unwrap(), vec!["widgets".to_string()]);

    let filter = MetadataFilter::equals(META_KNOWLEDGE, "widgets");
    let hits = h
        .store
        .similarity_search("gears", 10, Some(&filter))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|s| s.chunk.metadata[META_FILENAME] != "broken.pdf"));
}

#[tokio::test]
async fn repository_ingestion_survives_two_failed_clones() {
    let h = harness(2, 3);
    let report = h
        .pipeline
        .ingest_repository("https://git.example.com/acme/widgets.git")
        .await
        .unwrap();

    // Tag derived from the URL's last segment, ".git" stripped.
    assert_eq!(h.registry.list().await.unwrap(), vec!["widgets".to_string()]);
    assert_eq!(report.files_processed, 2);
    assert!(report.chunk_count >= 2);

    // .git internals are never indexed.
    let filter = MetadataFilter::equals(META_KNOWLEDGE, "widgets");
    let hits = h
        .store
        .similarity_search("core", 10, Some(&filter))
        .await
        .unwrap();
    assert!(hits
        .iter()
        .all(|s| !s.chunk.metadata[META_FILENAME].starts_with(".git")));

    // Scratch checkout is gone once ingestion returns.
    let leftovers = std::fs::read_dir(h.scratch_root.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn clone_exhaustion_cleans_scratch_and_registers_nothing() {
    let h = harness(3, 3);
    let err = h
        .pipeline
        .ingest_repository("https://git.example.com/acme/widgets.git")
        .await
        .unwrap_err();

    match err {
        IngestError::Fetch(FetchError::ExhaustedRetries { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(last.contains("Connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.registry.list().await.unwrap().is_empty());
    assert!(h.store.is_empty());
    let leftovers = std::fs::read_dir(h.scratch_root.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn delete_tag_removes_chunks_and_registry_entry() {
    let h = harness(0, 3);
    h.pipeline
        .ingest("docs", vec![text_file("a.md", "alpha"), text_file("b.md", "beta")])
        .await
        .unwrap();
    h.pipeline
        .ingest("keep", vec![text_file("c.md", "gamma")])
        .await
        .unwrap();

    let removed = h.pipeline.delete_tag("docs").await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(h.registry.list().await.unwrap(), vec!["keep".to_string()]);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn large_document_round_trips_through_coarse_path() {
    let h = harness(0, 3);
    let store = h.store.clone();

    // Force the coarse path with a tiny threshold via a dedicated pipeline.
    let registry = TagRegistry::new(Arc::new(MemoryTagStore::new()));
    let fetch_config = FetchConfig {
        scratch_root: h.scratch_root.path().to_path_buf(),
        max_attempts: 1,
        retry_delay_secs: 0,
    };
    let pipeline = IngestPipeline::new(
        store.clone() as Arc<dyn VectorStore>,
        registry,
        RepoFetcher::with_backend(&fetch_config, Box::new(FlakyClone::new(0))),
        ChunkingConfig {
            max_tokens: 8,
            coarse_threshold_chars: 200,
            coarse_window_chars: 150,
        },
        IngestConfig {
            batch_delay_ms: 0,
            ..Default::default()
        },
    );

    let body = "searchable words here ".repeat(30);
    let report = pipeline
        .ingest("big", vec![text_file("big.txt", &body)])
        .await
        .unwrap();

    assert!(report.chunk_count > 5);
    assert_eq!(store.len(), report.chunk_count);

    // Chunks on the coarse path carry their window offsets.
    let filter = MetadataFilter::equals(META_KNOWLEDGE, "big");
    let hits = store
        .similarity_search("searchable words", 5, Some(&filter))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    for hit in &hits {
        let start: usize = hit.chunk.metadata["chunkStart"].parse().unwrap();
        let end: usize = hit.chunk.metadata["chunkEnd"].parse().unwrap();
        assert!(start < end && end <= body.chars().count());
    }
}
