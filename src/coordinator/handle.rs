use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};

use gitvault_core::hash::hash_title;
use gitvault_core::models::{
    ArticlePage, FlushReport, IndexStatus, ProcessAck, TaskOutcome, TaskParams, TitleIndexEntry,
    WriteTask,
};
use gitvault_core::paths::VaultLayout;
use gitvault_core::store::{check_page, IndexStore, LedgerLookup, StoreDiagnostics, Table};
use gitvault_core::{VaultError, VaultResult};

pub(super) enum Command {
    Process {
        task_id: String,
        reply: Option<oneshot::Sender<VaultResult<TaskOutcome>>>,
    },
    Flush {
        reply: oneshot::Sender<VaultResult<FlushReport>>,
    },
    Reset {
        reply: oneshot::Sender<VaultResult<()>>,
    },
}

fn worker_gone() -> VaultError {
    VaultError::Other(anyhow!("coordinator worker is not running"))
}

/// Cheap, cloneable entry point to one tenant's coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tenant: Arc<str>,
    flush_threshold: i64,
    tx: mpsc::Sender<Command>,
    store: Arc<dyn IndexStore>,
}

impl CoordinatorHandle {
    pub(super) fn new(
        tenant: String,
        flush_threshold: i64,
        tx: mpsc::Sender<Command>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            flush_threshold,
            tx,
            store,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Validate and record a write request in the ledger. Returns its task id.
    pub async fn submit_task(&self, params: TaskParams) -> VaultResult<String> {
        params.validate()?;
        VaultLayout::new(&params.vault_path, &params.vault_name)?;
        let task = WriteTask::new(params);
        self.store.put_task(&task).await?;
        tracing::info!(tenant = %self.tenant, task_id = %task.task_id, "task submitted");
        Ok(task.task_id)
    }

    /// Queue a task and return without waiting for it.
    ///
    /// Unknown ids fail with `NotFound`; completed ones answer
    /// `completed: true` without queueing anything.
    pub async fn process_task(&self, task_id: &str) -> VaultResult<ProcessAck> {
        match self.store.lookup_task(task_id).await? {
            LedgerLookup::Missing => Err(VaultError::NotFound(format!("task {}", task_id))),
            LedgerLookup::Completed => Ok(ProcessAck {
                task_id: task_id.to_string(),
                completed: true,
            }),
            LedgerLookup::Pending(_) => {
                self.tx
                    .send(Command::Process {
                        task_id: task_id.to_string(),
                        reply: None,
                    })
                    .await
                    .map_err(|_| worker_gone())?;
                Ok(ProcessAck {
                    task_id: task_id.to_string(),
                    completed: false,
                })
            }
        }
    }

    /// Queue a task and wait for its outcome.
    pub async fn process_and_wait(&self, task_id: &str) -> VaultResult<TaskOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Process {
                task_id: task_id.to_string(),
                reply: Some(reply),
            })
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Re-drive every retained ledger entry, oldest first.
    pub async fn retry_pending(&self) -> VaultResult<Vec<(String, VaultResult<TaskOutcome>)>> {
        let pending = self.store.pending_tasks().await?;
        let mut results = Vec::with_capacity(pending.len());
        for task in pending {
            let outcome = self.process_and_wait(&task.task_id).await;
            results.push((task.task_id, outcome));
        }
        Ok(results)
    }

    pub async fn pending_tasks(&self) -> VaultResult<Vec<WriteTask>> {
        Ok(self.store.pending_tasks().await?)
    }

    pub async fn list_articles(&self, page: i64, page_size: i64) -> VaultResult<ArticlePage> {
        check_page(page, page_size).map_err(|e| VaultError::Validation(e.to_string()))?;
        Ok(self.store.list_articles_page(page, page_size).await?)
    }

    pub async fn index_status(&self) -> VaultResult<IndexStatus> {
        let limits = self.store.limits();
        Ok(IndexStatus {
            tenant: self.tenant.to_string(),
            state: self.store.load_state().await?.unwrap_or_default(),
            title_entries: self.store.count(Table::TitleIndex).await?,
            articles: self.store.count(Table::ArticleContent).await?,
            buffered_entries: self.store.count(Table::TitleIndexCache).await?,
            pending_tasks: self.store.count(Table::WriteTasks).await?,
            flush_threshold: self.flush_threshold,
            max_title_entries: limits.max_title_entries,
            max_articles: limits.max_articles,
        })
    }

    /// Resolve a title to its remote article path. Counts as an access.
    pub async fn lookup_title(&self, title: &str) -> VaultResult<TitleIndexEntry> {
        if title.trim().is_empty() {
            return Err(VaultError::Validation("title must not be empty".to_string()));
        }
        self.store
            .title_by_hash(&hash_title(title))
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("title '{}'", title)))
    }

    /// Flush buffered title lines now, regardless of the threshold.
    pub async fn flush_index(&self) -> VaultResult<FlushReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush { reply })
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Clear every local row and restart the shard counters.
    pub async fn reset_all(&self) -> VaultResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Reset { reply })
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    pub async fn inspect(&self) -> VaultResult<StoreDiagnostics> {
        Ok(self.store.inspect().await?)
    }
}
