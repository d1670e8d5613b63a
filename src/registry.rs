//! Knowledge tag registry.
//!
//! Tags name the partitions of the vector index. The registry is an ordered
//! list (insertion order, no duplicates) kept in Redis so it survives
//! restarts, with an in-memory implementation for tests and standalone runs.
//! The backend is selected by `registry.backend` in the config.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;

use crate::config::RegistryConfig;

/// Ordered tag collection. Implementations only need raw list operations;
/// [`TagRegistry`] layers the no-duplicates guarantee on top.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn list(&self) -> Result<Vec<String>>;
    async fn push(&self, tag: &str) -> Result<()>;
    async fn remove(&self, tag: &str) -> Result<()>;
}

/// Redis-backed tag list (RPUSH / LRANGE / LREM on a single key).
pub struct RedisTagStore {
    conn: redis::aio::ConnectionManager,
    key: String,
}

impl RedisTagStore {
    pub async fn connect(url: &str, key: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl TagStore for RedisTagStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let tags: Vec<String> = conn.lrange(&self.key, 0, -1).await?;
        Ok(tags)
    }

    async fn push(&self, tag: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(&self.key, tag).await?;
        Ok(())
    }

    async fn remove(&self, tag: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lrem(&self.key, 0, tag).await?;
        Ok(())
    }
}

/// In-memory tag list for tests and standalone runs.
#[derive(Default)]
pub struct MemoryTagStore {
    tags: std::sync::Mutex<Vec<String>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.tags.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn push(&self, tag: &str) -> Result<()> {
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tag.to_string());
        Ok(())
    }

    async fn remove(&self, tag: &str) -> Result<()> {
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| t != tag);
        Ok(())
    }
}

/// Registry facade guaranteeing at most one occurrence per tag.
///
/// The check-then-insert in [`add_if_absent`](TagRegistry::add_if_absent)
/// holds an async mutex so two concurrent ingestions of the same tag cannot
/// both observe it missing.
#[derive(Clone)]
pub struct TagRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    store: Arc<dyn TagStore>,
    write_lock: tokio::sync::Mutex<()>,
}

impl TagRegistry {
    pub fn new(store: Arc<dyn TagStore>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Build a registry from config, selecting the backend by name.
    pub async fn from_config(config: &RegistryConfig) -> Result<Self> {
        let store: Arc<dyn TagStore> = match config.backend.as_str() {
            "redis" => Arc::new(RedisTagStore::connect(&config.url, &config.key).await?),
            _ => Arc::new(MemoryTagStore::new()),
        };
        Ok(Self::new(store))
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.inner.store.list().await
    }

    /// Register a tag unless it is already present. Returns whether the tag
    /// was newly added.
    pub async fn add_if_absent(&self, tag: &str) -> Result<bool> {
        let _guard = self.inner.write_lock.lock().await;
        if self.inner.store.list().await?.iter().any(|t| t == tag) {
            return Ok(false);
        }
        self.inner.store.push(tag).await?;
        Ok(true)
    }

    pub async fn remove(&self, tag: &str) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.store.remove(tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_registry() -> TagRegistry {
        TagRegistry::new(Arc::new(MemoryTagStore::new()))
    }

    #[tokio::test]
    async fn test_add_if_absent_true_then_false() {
        let registry = memory_registry();
        assert!(registry.add_if_absent("docs").await.unwrap());
        assert!(!registry.add_if_absent("docs").await.unwrap());
        assert_eq!(registry.list().await.unwrap(), vec!["docs".to_string()]);
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let registry = memory_registry();
        registry.add_if_absent("beta").await.unwrap();
        registry.add_if_absent("alpha").await.unwrap();
        registry.add_if_absent("beta").await.unwrap();
        assert_eq!(
            registry.list().await.unwrap(),
            vec!["beta".to_string(), "alpha".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remove_deletes_tag() {
        let registry = memory_registry();
        registry.add_if_absent("docs").await.unwrap();
        registry.remove("docs").await.unwrap();
        assert!(registry.list().await.unwrap().is_empty());
        assert!(registry.add_if_absent("docs").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_adds_insert_once() {
        let registry = memory_registry();
        let adds = (0..8).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.add_if_absent("docs").await.unwrap() })
        });
        let results = futures::future::join_all(adds).await;
        let inserted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(inserted, 1);
    }
}
