//! Git repository fetcher with retrying clone and scratch-dir lifecycle.
//!
//! Clones go through the `git` binary (tokio::process) into a uniquely
//! named scratch directory. The scratch directory is deleted when the
//! [`CheckedOutRepo`] guard drops, so every exit path — successful walk,
//! exhausted retries, cancellation — leaves the path either fully
//! populated or absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use thiserror::Error;

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("clone failed after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },
    #[error("clone process was interrupted by a signal")]
    Interrupted,
    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid repository url: {0}")]
    InvalidUrl(String),
}

/// Outcome of a single clone attempt.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("{0}")]
    Failed(String),
    #[error("interrupted by signal")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One clone attempt into `dest`. Separated from the retry loop so tests
/// can substitute a flaky backend.
#[async_trait]
pub trait CloneBackend: Send + Sync {
    async fn clone_into(&self, url: &str, dest: &Path) -> Result<(), CloneError>;
}

/// Real backend shelling out to `git clone --single-branch`.
pub struct GitCloneBackend;

#[async_trait]
impl CloneBackend for GitCloneBackend {
    async fn clone_into(&self, url: &str, dest: &Path) -> Result<(), CloneError> {
        let output = tokio::process::Command::new("git")
            .args(["clone", "--single-branch"])
            .arg(url)
            .arg(dest)
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }
        // No exit code means the process was killed by a signal.
        if output.status.code().is_none() {
            return Err(CloneError::Interrupted);
        }
        Err(CloneError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// A cloned repository in a scratch directory, removed on drop.
pub struct CheckedOutRepo {
    _scratch: TempDir,
    repo_path: PathBuf,
}

impl CheckedOutRepo {
    /// Root of the checked-out working tree.
    pub fn path(&self) -> &Path {
        &self.repo_path
    }
}

pub struct RepoFetcher {
    backend: Box<dyn CloneBackend>,
    scratch_root: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
}

impl RepoFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self::with_backend(config, Box::new(GitCloneBackend))
    }

    pub fn with_backend(config: &FetchConfig, backend: Box<dyn CloneBackend>) -> Self {
        Self {
            backend,
            scratch_root: config.scratch_root.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Clone `url` into a fresh scratch directory, retrying transient
    /// failures with linear backoff (`retry_delay * attempt`).
    pub async fn clone_repo(&self, url: &str) -> Result<CheckedOutRepo, FetchError> {
        std::fs::create_dir_all(&self.scratch_root)?;
        let scratch = TempDir::with_prefix_in("clone-", &self.scratch_root)?;
        let dest = scratch.path().join("repo");

        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            tracing::info!(url, attempt, "cloning repository");
            match self.backend.clone_into(url, &dest).await {
                Ok(()) => {
                    return Ok(CheckedOutRepo {
                        _scratch: scratch,
                        repo_path: dest,
                    });
                }
                Err(CloneError::Interrupted) => return Err(FetchError::Interrupted),
                Err(CloneError::Io(e)) => return Err(FetchError::Io(e)),
                Err(CloneError::Failed(stderr)) => {
                    if is_connection_reset(&stderr) {
                        tracing::warn!(url, attempt, "connection reset during clone: {stderr}");
                    } else {
                        tracing::warn!(url, attempt, "clone attempt failed: {stderr}");
                    }
                    last = stderr;
                    // A failed attempt can leave a partial checkout behind.
                    if dest.exists() {
                        std::fs::remove_dir_all(&dest)?;
                    }
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }
        Err(FetchError::ExhaustedRetries {
            attempts: self.max_attempts,
            last,
        })
    }
}

fn is_connection_reset(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("connection reset") || lower.contains("connection was reset")
}

/// Derive a knowledge tag from a repository URL: the final path segment
/// with any `.git` suffix stripped.
pub fn repo_name_from_url(url: &str) -> Result<String, FetchError> {
    let trimmed = url.trim_end_matches('/');
    let name = trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");
    if name.is_empty() {
        return Err(FetchError::InvalidUrl(url.to_string()));
    }
    Ok(name.to_string())
}
