//! Per-tenant push coordinator.
//!
//! Each tenant is served by exactly one [`Coordinator`] running as a tokio
//! task. It owns the tenant's shard counters and drains a channel of
//! commands one at a time, so a task's remote pushes never overlap with
//! another task's for the same tenant. Tenants share nothing and run in
//! parallel.
//!
//! Processing one task:
//!
//! ```text
//! Idle → Allocating → CreatingPrereqs → PushingContent → UpdatingIndex
//!      → FlushingIndex (when the buffer reaches the threshold) → Completing
//! ```
//!
//! Counters are persisted before any network call. A task that fails after
//! that point leaves a gap in the shard sequence; the slot is never reused.
//!
//! Buffered title lines remember the repository their article went to. A
//! flush groups them by repository and index file, and reaches repositories
//! other than the current task's through the credentials last used for them.
//!
//! Callers talk to the worker through a [`CoordinatorHandle`]; reads that do
//! not touch the counters (listings, status, lookups) go straight to the
//! store.

mod handle;

pub use handle::CoordinatorHandle;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gitvault_core::allocator::{allocate, AllocationLimits, FileLocationResult};
use gitvault_core::hash::hash_title;
use gitvault_core::index_file::merge_block;
use gitvault_core::models::{
    CoordinatorState, Credentials, FlushReport, NewTitleEntry, RepoCoordinates,
    TitleIndexCacheEntry, TaskOutcome,
};
use gitvault_core::paths::VaultLayout;
use gitvault_core::store::{IndexStore, LedgerLookup, Table};
use gitvault_core::{VaultError, VaultResult};

use crate::config::Config;
use crate::remote::{ContentStore, ContentStoreFactory, MergeOutcome, RetryPolicy};
use crate::token_cache::TokenCache;

/// `kvMeta` key holding the last repository this tenant pushed to.
const REMOTE_TARGET_KEY: &str = "remoteTarget";

/// `kvMeta` key holding the credentials last used for one repository.
fn repo_target_key(repo: &RepoCoordinates) -> String {
    format!("{}:{}", REMOTE_TARGET_KEY, repo)
}

/// Tunables for one tenant's coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub tenant: String,
    pub allocation: AllocationLimits,
    pub flush_threshold: i64,
    pub retry: RetryPolicy,
    pub token_ttl_buffer_secs: i64,
    pub queue_depth: usize,
}

impl CoordinatorSettings {
    pub fn from_config(tenant: &str, config: &Config) -> Self {
        Self {
            tenant: tenant.to_string(),
            allocation: config.coordinator.allocation_limits(),
            flush_threshold: config.coordinator.flush_threshold,
            retry: RetryPolicy::from_config(&config.remote),
            token_ttl_buffer_secs: config.coordinator.token_ttl_buffer_secs,
            queue_depth: config.coordinator.queue_depth,
        }
    }
}

/// Repository and credentials a flush can reconnect with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTarget {
    repo: RepoCoordinates,
    credentials: Credentials,
}

/// The single writer for one tenant.
pub struct Coordinator {
    settings: CoordinatorSettings,
    store: Arc<dyn IndexStore>,
    remote: Arc<dyn ContentStoreFactory>,
    tokens: Arc<TokenCache>,
    state: CoordinatorState,
}

impl Coordinator {
    /// Load (or create) the persisted counters, then spawn the worker.
    ///
    /// Initialization completes before the handle is returned, so no task
    /// can be processed against unloaded counters.
    pub async fn start(
        settings: CoordinatorSettings,
        store: Arc<dyn IndexStore>,
        remote: Arc<dyn ContentStoreFactory>,
        tokens: Arc<TokenCache>,
    ) -> VaultResult<CoordinatorHandle> {
        let state = match store.load_state().await? {
            Some(state) if state.initialized => state,
            _ => {
                let state = CoordinatorState::initial();
                store.save_state(&state).await?;
                state
            }
        };
        tracing::info!(
            tenant = %settings.tenant,
            folder = state.folder_index_in_vault,
            file = state.file_index_in_folder,
            title_file = state.index_of_title_index_files,
            "coordinator started"
        );

        let (tx, rx) = tokio::sync::mpsc::channel(settings.queue_depth.max(1));
        let handle = CoordinatorHandle::new(
            settings.tenant.clone(),
            settings.flush_threshold,
            tx,
            store.clone(),
        );
        let coordinator = Coordinator {
            settings,
            store,
            remote,
            tokens,
            state,
        };
        tokio::spawn(coordinator.run(rx));
        Ok(handle)
    }

    async fn run(mut self, mut rx: tokio::sync::mpsc::Receiver<handle::Command>) {
        use handle::Command;

        while let Some(command) = rx.recv().await {
            match command {
                Command::Process { task_id, reply } => {
                    let result = self.process(&task_id).await;
                    if let Err(e) = &result {
                        tracing::error!(
                            tenant = %self.settings.tenant,
                            task_id = %task_id,
                            code = e.code(),
                            error = %e,
                            "task failed; ledger entry kept"
                        );
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Command::Flush { reply } => {
                    let _ = reply.send(self.flush_index().await);
                }
                Command::Reset { reply } => {
                    let _ = reply.send(self.reset_all().await);
                }
            }
        }
        tracing::debug!(tenant = %self.settings.tenant, "coordinator stopped");
    }

    async fn process(&mut self, task_id: &str) -> VaultResult<TaskOutcome> {
        let task = match self.store.lookup_task(task_id).await? {
            LedgerLookup::Missing => {
                return Err(VaultError::NotFound(format!("task {}", task_id)))
            }
            LedgerLookup::Completed => return Ok(TaskOutcome::already_completed(task_id)),
            LedgerLookup::Pending(task) => *task,
        };
        if task.completed {
            self.store.complete_task(task_id).await?;
            return Ok(TaskOutcome::already_completed(task_id));
        }

        let params = &task.params;
        params.validate()?;
        let layout = VaultLayout::new(&params.vault_path, &params.vault_name)?;
        let token = self.resolve_token(&params.credentials).await?;
        let remote = self.remote.connect(&params.repo, &token);
        self.remember_target(&params.repo, &params.credentials)
            .await?;

        // Allocating
        let with_title = params.has_title();
        let location = allocate(&layout, &self.state, self.settings.allocation);
        let next = location.advance(&self.state, with_title);
        self.store.save_state(&next).await?;
        self.state = next;
        tracing::info!(
            tenant = %self.settings.tenant,
            task_id,
            path = %location.file_path,
            "allocated shard"
        );

        // CreatingPrereqs
        self.create_prereqs(remote.as_ref(), &layout, &location, with_title)
            .await?;

        // PushingContent
        let sha = self
            .settings
            .retry
            .put_with_retry(
                remote.as_ref(),
                &location.file_path,
                &params.content,
                &params.commit_message,
            )
            .await?;

        // UpdatingIndex
        self.store
            .insert_article(&params.title, &params.content)
            .await?;
        let mut flush = None;
        if with_title {
            self.index_title(&params.title, &params.repo, &location)
                .await?;
            let buffered = self.store.count(Table::TitleIndexCache).await?;
            if buffered >= self.settings.flush_threshold {
                // FlushingIndex
                flush = Some(
                    self.flush_buffer(Some((&params.repo, remote.as_ref())))
                        .await,
                );
            }
        }

        // Completing
        self.store.complete_task(task_id).await?;
        tracing::info!(tenant = %self.settings.tenant, task_id, sha = %sha, "task completed");

        Ok(TaskOutcome {
            task_id: task_id.to_string(),
            completed: true,
            already_completed: false,
            remote_path: Some(location.file_path),
            sha: Some(sha),
            flush,
        })
    }

    async fn resolve_token(&self, credentials: &Credentials) -> VaultResult<String> {
        self.tokens.offer(
            &credentials.installation_id,
            &credentials.token,
            credentials.expires_at,
        );
        let offered = credentials.clone();
        self.tokens
            .get_or_refresh(
                &credentials.installation_id,
                self.settings.token_ttl_buffer_secs,
                || async move {
                    let now = chrono::Utc::now().timestamp();
                    match offered.expires_at {
                        Some(exp) if exp <= now => Err(VaultError::Validation(format!(
                            "token for installation {} expired",
                            offered.installation_id
                        ))),
                        _ => Ok((offered.token, offered.expires_at)),
                    }
                },
            )
            .await
    }

    async fn remember_target(
        &self,
        repo: &RepoCoordinates,
        credentials: &Credentials,
    ) -> VaultResult<()> {
        let target = RemoteTarget {
            repo: repo.clone(),
            credentials: credentials.clone(),
        };
        let json = serde_json::to_string(&target).map_err(anyhow::Error::from)?;
        self.store.put_meta(&repo_target_key(repo), &json).await?;
        self.store.put_meta(REMOTE_TARGET_KEY, &json).await?;
        Ok(())
    }

    /// Reconnect to a repository with the credentials last recorded for it.
    async fn connect_target(&self, repo: &RepoCoordinates) -> VaultResult<Arc<dyn ContentStore>> {
        let json = match self.store.get_meta(&repo_target_key(repo)).await? {
            Some(json) => Some(json),
            None => self.store.get_meta(REMOTE_TARGET_KEY).await?,
        };
        let target: Option<RemoteTarget> = json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(anyhow::Error::from)?;
        let target = match target {
            Some(target) if target.repo == *repo => target,
            _ => {
                return Err(VaultError::Validation(format!(
                    "no credentials recorded for {}",
                    repo
                )))
            }
        };
        let token = self.resolve_token(&target.credentials).await?;
        Ok(self.remote.connect(&target.repo, &token))
    }

    /// Folder and index-file creates address disjoint paths, so they run
    /// concurrently.
    async fn create_prereqs(
        &self,
        remote: &dyn ContentStore,
        layout: &VaultLayout,
        location: &FileLocationResult,
        with_title: bool,
    ) -> VaultResult<()> {
        let retry = self.settings.retry;
        let marker = layout.folder_marker_path(location.folder_index);
        let folder = async {
            if location.need_create_folder {
                let message = format!("Create {}", location.folder_path);
                retry
                    .create_if_absent(remote, &marker, "", &message)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let index = async {
            if with_title && location.need_create_index_file {
                let message = format!("Create {}", location.title_index_file_path);
                retry
                    .create_if_absent(remote, &location.title_index_file_path, "", &message)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let (folder, index) = tokio::join!(folder, index);
        if let Some(outcome) = folder? {
            tracing::debug!(path = %marker, ?outcome, "folder ready");
        }
        if let Some(outcome) = index? {
            tracing::debug!(path = %location.title_index_file_path, ?outcome, "index file ready");
        }
        Ok(())
    }

    async fn index_title(
        &self,
        title: &str,
        repo: &RepoCoordinates,
        location: &FileLocationResult,
    ) -> VaultResult<()> {
        let inserted = self
            .store
            .insert_title(NewTitleEntry {
                title: title.to_string(),
                hash_of_title: hash_title(title),
                remote_article_path: location.file_path.clone(),
            })
            .await?;
        if inserted.evicted > 0 {
            tracing::info!(
                tenant = %self.settings.tenant,
                evicted = inserted.evicted,
                "title index at capacity; evicted least recently used"
            );
        }

        let count = self.store.count(Table::TitleIndex).await?;
        let max = self.store.limits().max_title_entries;
        if count > max {
            return Err(VaultError::CapacityInvariantViolation(format!(
                "titleIndex holds {} rows, cap is {}",
                count, max
            )));
        }

        self.store
            .buffer_title(&TitleIndexCacheEntry::from_entry(
                &inserted.entry,
                repo,
                &location.title_index_file_path,
            ))
            .await?;
        Ok(())
    }

    /// Flush the buffer, reporting rather than propagating failure: the
    /// article is already pushed, only index visibility is delayed.
    ///
    /// `current` is the connection the running task already holds.
    async fn flush_buffer(
        &self,
        current: Option<(&RepoCoordinates, &dyn ContentStore)>,
    ) -> FlushReport {
        match self.try_flush(current).await {
            Ok(report) => report,
            Err(e) => {
                let entries = self
                    .store
                    .count(Table::TitleIndexCache)
                    .await
                    .unwrap_or_default() as usize;
                tracing::warn!(
                    tenant = %self.settings.tenant,
                    entries,
                    error = %e,
                    "title index flush deferred"
                );
                FlushReport::Deferred {
                    entries,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_flush(
        &self,
        current: Option<(&RepoCoordinates, &dyn ContentStore)>,
    ) -> VaultResult<FlushReport> {
        let entries = self.store.buffered_titles().await?;
        if entries.is_empty() {
            return Ok(FlushReport::Empty);
        }

        let mut by_repo: BTreeMap<RepoCoordinates, BTreeMap<String, Vec<TitleIndexCacheEntry>>> =
            BTreeMap::new();
        for entry in &entries {
            by_repo
                .entry(entry.repo.clone())
                .or_default()
                .entry(entry.index_file_path.clone())
                .or_default()
                .push(entry.clone());
        }

        let mut files = 0;
        for (repo, by_file) in &by_repo {
            let connected;
            let remote: &dyn ContentStore = match current {
                Some((current_repo, remote)) if current_repo == repo => remote,
                _ => {
                    connected = self.connect_target(repo).await?;
                    connected.as_ref()
                }
            };
            for (path, block) in by_file {
                let message = format!("Update {} ({} titles)", path, block.len());
                let outcome = self
                    .settings
                    .retry
                    .merge_with_retry(remote, path, &message, |existing| {
                        merge_block(existing, block)
                    })
                    .await?;
                if let MergeOutcome::Written { added, .. } = outcome {
                    tracing::info!(
                        tenant = %self.settings.tenant,
                        repo = %repo,
                        path = %path,
                        added,
                        "title index flushed"
                    );
                }
                files += 1;
            }
        }

        self.store.clear_buffer().await?;
        Ok(FlushReport::Written {
            entries: entries.len(),
            files,
        })
    }

    async fn flush_index(&self) -> VaultResult<FlushReport> {
        if self.store.count(Table::TitleIndexCache).await? == 0 {
            return Ok(FlushReport::Empty);
        }
        Ok(self.flush_buffer(None).await)
    }

    async fn reset_all(&mut self) -> VaultResult<()> {
        self.store.reset().await?;
        let state = CoordinatorState::initial();
        self.store.save_state(&state).await?;
        self.state = state;
        tracing::warn!(tenant = %self.settings.tenant, "tenant index reset");
        Ok(())
    }
}
