//! Core data models used throughout gitvault.
//!
//! These types describe write requests as they sit in the task ledger, the
//! coordinator's persisted shard counters, and the rows of the local index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Where in the remote content store a tenant's vault lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCoordinates {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl fmt::Display for RepoCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// Bearer credentials issued by the (external) auth layer for one installation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub installation_id: String,
    pub token: String,
    /// Unix seconds. `None` means the token does not expire.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("installation_id", &self.installation_id)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Caller-supplied parameters of a write request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    pub commit_message: String,
    pub credentials: Credentials,
    pub repo: RepoCoordinates,
    /// Directory inside the repository that holds vaults (may be empty).
    #[serde(default)]
    pub vault_path: String,
    pub vault_name: String,
    /// Article title; an empty title skips the title index entirely.
    #[serde(default)]
    pub title: String,
    pub content: String,
}

impl TaskParams {
    /// Reject payloads that can never be pushed.
    pub fn validate(&self) -> VaultResult<()> {
        let required = [
            ("commitMessage", &self.commit_message),
            ("vaultName", &self.vault_name),
            ("content", &self.content),
            ("repo.owner", &self.repo.owner),
            ("repo.repo", &self.repo.repo),
            ("repo.branch", &self.repo.branch),
            ("credentials.installationId", &self.credentials.installation_id),
            ("credentials.token", &self.credentials.token),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(VaultError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

/// A write request as stored in the task ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTask {
    pub task_id: String,
    #[serde(flatten)]
    pub params: TaskParams,
    #[serde(default)]
    pub completed: bool,
}

impl WriteTask {
    pub fn new(params: TaskParams) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            params,
            completed: false,
        }
    }
}

/// Shard counters persisted in `kvMeta`.
///
/// `file_index_in_folder` and `index_of_title_index_files` start at `-1`:
/// nothing has been allocated yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorState {
    pub folder_index_in_vault: i64,
    pub file_index_in_folder: i64,
    pub index_of_title_index_files: i64,
    pub current_title_index_count: i64,
    pub initialized: bool,
}

impl CoordinatorState {
    pub fn initial() -> Self {
        Self {
            folder_index_in_vault: 0,
            file_index_in_folder: -1,
            index_of_title_index_files: -1,
            current_title_index_count: 0,
            initialized: true,
        }
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            initialized: false,
            ..Self::initial()
        }
    }
}

/// Title → remote article path mapping, LRU-bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleIndexEntry {
    pub id: String,
    pub title: String,
    pub hash_of_title: String,
    pub remote_article_path: String,
    pub created_at: i64,
    pub last_access: i64,
}

/// Input for a title-index insert.
#[derive(Debug, Clone)]
pub struct NewTitleEntry {
    pub title: String,
    pub hash_of_title: String,
    pub remote_article_path: String,
}

/// A buffered title-index line waiting for the next batch flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleIndexCacheEntry {
    pub id: String,
    pub title: String,
    pub hash_of_title: String,
    pub remote_article_path: String,
    /// Repository the article was pushed to; its index lines go there too.
    pub repo: RepoCoordinates,
    /// Remote index file this line belongs to.
    pub index_file_path: String,
    pub created_at: i64,
}

impl TitleIndexCacheEntry {
    pub fn from_entry(
        entry: &TitleIndexEntry,
        repo: &RepoCoordinates,
        index_file_path: &str,
    ) -> Self {
        Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            hash_of_title: entry.hash_of_title.clone(),
            remote_article_path: entry.remote_article_path.clone(),
            repo: repo.clone(),
            index_file_path: index_file_path.to_string(),
            created_at: entry.created_at,
        }
    }
}

/// Locally cached article body, count-bounded and FIFO-evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleContentEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: i64,
}

/// One page of cached articles, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlePage {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub articles: Vec<ArticleContentEntry>,
}

/// Result of processing one task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task_id: String,
    pub completed: bool,
    /// `true` when the task had already completed and no remote work ran.
    pub already_completed: bool,
    pub remote_path: Option<String>,
    pub sha: Option<String>,
    pub flush: Option<FlushReport>,
}

impl TaskOutcome {
    pub fn already_completed(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            completed: true,
            already_completed: true,
            remote_path: None,
            sha: None,
            flush: None,
        }
    }
}

/// Acknowledgement returned by the fire-and-forget `process_task` RPC.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessAck {
    pub task_id: String,
    pub completed: bool,
}

/// What a batch flush did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushReport {
    /// The buffer was empty.
    Empty,
    /// Lines were written to the remote index files.
    Written { entries: usize, files: usize },
    /// The buffer held on to its entries; they will go out on a later flush.
    Deferred { entries: usize, reason: String },
}

/// Snapshot answered by `get_index_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub tenant: String,
    pub state: CoordinatorState,
    pub title_entries: i64,
    pub articles: i64,
    pub buffered_entries: i64,
    pub pending_tasks: i64,
    pub flush_threshold: i64,
    pub max_title_entries: i64,
    pub max_articles: i64,
}
