//! Remote content store client.
//!
//! The remote store is a git-backed content API: every write is a full-file
//! PUT guarded by the sha of the version it replaces. [`ContentStore`] is the
//! two-call contract (get file + sha, put file with optional sha) and
//! [`RetryPolicy`] wraps it with the conflict handling every caller needs.
//!
//! | Status | Meaning | Handling |
//! |--------|---------|----------|
//! | 2xx | written | done |
//! | 404 | no such file (GET) | `Ok(None)` |
//! | 409 | branch head moved since the sha was read | re-fetch sha, back off, retry |
//! | 422 | target already exists (create without sha) | success for creates |
//! | other | | fatal for the call |
//!
//! Backends: [`github::GitHubContentStore`] (HTTP) and
//! [`memory::MemoryContentStore`] (in-process, with fault injection).

pub mod github;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use gitvault_core::index_file::MergedIndex;
use gitvault_core::models::RepoCoordinates;
use gitvault_core::VaultError;

use crate::config::RemoteConfig;

/// Outcome classes of a single remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 409: the sha we sent is stale.
    #[error("sha conflict writing {0}")]
    Conflict(String),

    /// 422: a create hit an existing file.
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("remote returned {status} for {path}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed remote response: {0}")]
    Malformed(String),

    /// Conflicts persisted through every attempt.
    #[error("conflict on {path} persisted after {attempts} attempts")]
    Exhausted { path: String, attempts: u32 },
}

impl From<RemoteError> for VaultError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Exhausted { path, attempts } => {
                VaultError::RemoteConflict { path, attempts }
            }
            RemoteError::Conflict(path) => VaultError::RemoteConflict { path, attempts: 1 },
            other => VaultError::RemoteFatal(other.to_string()),
        }
    }
}

/// A file as read from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub sha: String,
    pub content: String,
}

/// Result of an idempotent create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Written { sha: String },
    AlreadyExists,
}

/// Result of a merge-and-write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Written { sha: String, added: usize },
    /// The remote file already contained every line.
    Unchanged,
}

/// One repository branch of the remote content store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Current content and sha, or `None` on 404.
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, RemoteError>;

    /// Write `content` at `path`. `sha` must name the version being replaced;
    /// `None` means "create". Returns the new sha.
    async fn put_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<String, RemoteError>;
}

/// Opens a [`ContentStore`] for a repository with a bearer token.
pub trait ContentStoreFactory: Send + Sync {
    fn connect(&self, repo: &RepoCoordinates, token: &str) -> Arc<dyn ContentStore>;
}

/// Bounded retry with exponential backoff for conflicted writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff(),
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1).min(10))
    }

    async fn pause(&self, attempt: u32, path: &str, reason: &str) {
        let delay = self.backoff(attempt);
        tracing::warn!(
            path,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "retrying remote write"
        );
        tokio::time::sleep(delay).await;
    }

    /// Create `path` unless it already exists. A 422 counts as success.
    pub async fn create_if_absent(
        &self,
        store: &dyn ContentStore,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<PutOutcome, RemoteError> {
        for attempt in 1..=self.max_attempts {
            match store.put_file(path, content, message, None).await {
                Ok(sha) => return Ok(PutOutcome::Written { sha }),
                Err(RemoteError::AlreadyExists(_)) => return Ok(PutOutcome::AlreadyExists),
                Err(RemoteError::Conflict(_)) if attempt < self.max_attempts => {
                    self.pause(attempt, path, "409").await;
                }
                Err(RemoteError::Conflict(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Err(RemoteError::Exhausted {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Write `content` over whatever is at `path`, re-reading the sha before
    /// every attempt.
    pub async fn put_with_retry(
        &self,
        store: &dyn ContentStore,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, RemoteError> {
        for attempt in 1..=self.max_attempts {
            let sha = store.get_file(path).await?.map(|f| f.sha);
            match store.put_file(path, content, message, sha.as_deref()).await {
                Ok(sha) => return Ok(sha),
                // 422 here means the file appeared between our read and write.
                Err(RemoteError::Conflict(_)) | Err(RemoteError::AlreadyExists(_))
                    if attempt < self.max_attempts =>
                {
                    self.pause(attempt, path, "stale sha").await;
                }
                Err(RemoteError::Conflict(_)) | Err(RemoteError::AlreadyExists(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Err(RemoteError::Exhausted {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Read-merge-write loop for append-style files.
    ///
    /// `merge` maps the current remote content to the content to write. On a
    /// conflict the file is re-read; if its sha moved, the merge runs again
    /// against the latest content instead of overwriting it.
    pub async fn merge_with_retry<F>(
        &self,
        store: &dyn ContentStore,
        path: &str,
        message: &str,
        merge: F,
    ) -> Result<MergeOutcome, RemoteError>
    where
        F: Fn(&str) -> MergedIndex + Send + Sync,
    {
        let mut current = store.get_file(path).await?;
        let mut merged = merge(current.as_ref().map(|f| f.content.as_str()).unwrap_or(""));

        for attempt in 1..=self.max_attempts {
            if merged.added == 0 && current.is_some() {
                return Ok(MergeOutcome::Unchanged);
            }
            let sha = current.as_ref().map(|f| f.sha.as_str());
            match store.put_file(path, &merged.content, message, sha).await {
                Ok(sha) => {
                    return Ok(MergeOutcome::Written {
                        sha,
                        added: merged.added,
                    })
                }
                Err(RemoteError::Conflict(_)) | Err(RemoteError::AlreadyExists(_))
                    if attempt < self.max_attempts =>
                {
                    self.pause(attempt, path, "index file moved").await;
                    let latest = store.get_file(path).await?;
                    let moved = latest.as_ref().map(|f| &f.sha) != current.as_ref().map(|f| &f.sha);
                    if moved {
                        merged = merge(latest.as_ref().map(|f| f.content.as_str()).unwrap_or(""));
                        current = latest;
                    }
                }
                Err(RemoteError::Conflict(_)) | Err(RemoteError::AlreadyExists(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Err(RemoteError::Exhausted {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{Fault, MemoryContentStore};
    use super::*;
    use gitvault_core::index_file::{merge_block, parse_lines};
    use gitvault_core::models::TitleIndexCacheEntry;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        }
    }

    fn line(title: &str, created_at: i64) -> TitleIndexCacheEntry {
        TitleIndexCacheEntry {
            id: title.to_string(),
            title: title.to_string(),
            hash_of_title: gitvault_core::hash::hash_title(title),
            remote_article_path: format!("v/{title}.md"),
            repo: RepoCoordinates {
                owner: "acme".to_string(),
                repo: "notes".to_string(),
                branch: "main".to_string(),
            },
            index_file_path: "v/TitleIndex/TitleIndex_0.jsonl".to_string(),
            created_at,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_error_mapping() {
        let e: VaultError = RemoteError::Exhausted {
            path: "a".into(),
            attempts: 3,
        }
        .into();
        assert!(matches!(e, VaultError::RemoteConflict { attempts: 3, .. }));
        let e: VaultError = RemoteError::Status {
            path: "a".into(),
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(e.code(), "remote_error");
    }

    #[tokio::test]
    async fn test_put_converges_after_two_conflicts() {
        let store = MemoryContentStore::new();
        store.inject("doc.md", Fault::Conflict, 2);
        let sha = fast().put_with_retry(&store, "doc.md", "hello", "m").await.unwrap();
        assert_eq!(store.file("doc.md").as_deref(), Some("hello"));
        assert_eq!(store.sha("doc.md"), Some(sha));
        assert_eq!(store.successful_puts("doc.md"), 1);
        assert_eq!(store.put_attempts("doc.md"), 3);
    }

    #[tokio::test]
    async fn test_put_gives_up_after_max_attempts() {
        let store = MemoryContentStore::new();
        store.inject("doc.md", Fault::Conflict, 5);
        let err = fast().put_with_retry(&store, "doc.md", "x", "m").await.unwrap_err();
        assert!(matches!(err, RemoteError::Exhausted { attempts: 3, .. }));
        assert!(store.file("doc.md").is_none());
    }

    #[tokio::test]
    async fn test_put_does_not_retry_fatal_status() {
        let store = MemoryContentStore::new();
        store.inject("doc.md", Fault::Status(500), 1);
        let err = fast().put_with_retry(&store, "doc.md", "x", "m").await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 500, .. }));
        assert_eq!(store.put_attempts("doc.md"), 1);
    }

    #[tokio::test]
    async fn test_create_treats_existing_as_success() {
        let store = MemoryContentStore::new();
        store.seed("dir/.gitkeep", "");
        let outcome = fast()
            .create_if_absent(&store, "dir/.gitkeep", "", "m")
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_merge_remerges_when_file_moved() {
        let store = MemoryContentStore::new();
        let path = "v/TitleIndex/TitleIndex_0.jsonl";
        store.seed(path, "");
        let foreign = merge_block("", &[line("Foreign", 5)]).content;
        store.inject(path, Fault::ConcurrentWrite(foreign), 1);

        let block = vec![line("Mine", 10)];
        let outcome = fast()
            .merge_with_retry(&store, path, "m", |existing| merge_block(existing, &block))
            .await
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Written { added: 1, .. }));

        let titles: Vec<String> = parse_lines(&store.file(path).unwrap())
            .into_iter()
            .map(|l| l.title)
            .collect();
        assert_eq!(titles, vec!["Mine", "Foreign"]);
    }

    #[tokio::test]
    async fn test_merge_skips_write_when_nothing_new() {
        let store = MemoryContentStore::new();
        let path = "idx.jsonl";
        let block = vec![line("A", 1)];
        store.seed(path, &merge_block("", &block).content);
        let outcome = fast()
            .merge_with_retry(&store, path, "m", |existing| merge_block(existing, &block))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(store.put_attempts(path), 0);
    }
}
