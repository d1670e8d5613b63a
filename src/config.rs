use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// "redis" or "memory".
    #[serde(default = "default_registry_backend")]
    pub backend: String,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_tag_key")]
    pub key: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            url: default_redis_url(),
            key: default_tag_key(),
        }
    }
}

fn default_registry_backend() -> String {
    "memory".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_tag_key() -> String {
    "ragTag".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            collection: default_collection(),
        }
    }
}

fn default_vector_url() -> String {
    "http://127.0.0.1:6333".to_string()
}
fn default_collection() -> String {
    "knowledge".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// "ollama" or "openai".
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embed_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: default_embed_model(),
            dims: default_dims(),
            url: default_embed_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embed_provider() -> String {
    "ollama".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_embed_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_embed_url")]
    pub url: String,
    #[serde(default = "default_chat_model")]
    pub default_model: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: default_embed_url(),
            default_model: default_chat_model(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "llama3.1".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_coarse_threshold")]
    pub coarse_threshold_chars: usize,
    #[serde(default = "default_coarse_window")]
    pub coarse_window_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            coarse_threshold_chars: default_coarse_threshold(),
            coarse_window_chars: default_coarse_window(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_coarse_threshold() -> usize {
    500_000
}
fn default_coarse_window() -> usize {
    400_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            upload_batch_size: default_upload_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_max_workers() -> usize {
    3
}
fn default_upload_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scratch_root: default_scratch_root(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("rag-harness")
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.coarse_window_chars == 0
        || config.chunking.coarse_window_chars > config.chunking.coarse_threshold_chars
    {
        anyhow::bail!("chunking.coarse_window_chars must be in 1..=coarse_threshold_chars");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.ingest.max_workers < 1 {
        anyhow::bail!("ingest.max_workers must be >= 1");
    }
    if config.ingest.upload_batch_size < 1 {
        anyhow::bail!("ingest.upload_batch_size must be >= 1");
    }
    if config.fetch.max_attempts < 1 {
        anyhow::bail!("fetch.max_attempts must be >= 1");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    match config.registry.backend.as_str() {
        "redis" | "memory" => {}
        other => anyhow::bail!(
            "Unknown registry backend: '{}'. Must be redis or memory.",
            other
        ),
    }
    Ok(())
}
