//! Local index storage abstraction.
//!
//! The [`IndexStore`] trait defines every operation the push coordinator
//! needs from its per-tenant local store: scalar coordinator state, the
//! LRU-bounded title index, the FIFO-bounded article cache, the flush buffer,
//! and the task ledger. Backends: SQLite (application crate) and
//! [`memory::InMemoryIndexStore`] for tests.
//!
//! Each logical table keeps a counter that is adjusted alongside every
//! mutation, so [`IndexStore::count`] never scans.

pub mod memory;

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    ArticleContentEntry, ArticlePage, CoordinatorState, NewTitleEntry, TitleIndexCacheEntry,
    TitleIndexEntry, WriteTask,
};

/// Default cap on title-index rows.
pub const MAX_TITLE_ENTRIES: i64 = 30_000;
/// Default cap on cached article bodies.
pub const MAX_ARTICLES_TO_STORE: i64 = 1_000;
/// Completion tombstones kept for idempotent re-processing.
pub const MAX_COMPLETED_TASKS: i64 = 1_000;
/// Largest page accepted by [`IndexStore::list_articles_page`].
pub const MAX_PAGE_SIZE: i64 = 100;

/// Capacity bounds enforced by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_title_entries: i64,
    pub max_articles: i64,
    pub max_completed_tasks: i64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_title_entries: MAX_TITLE_ENTRIES,
            max_articles: MAX_ARTICLES_TO_STORE,
            max_completed_tasks: MAX_COMPLETED_TASKS,
        }
    }
}

/// Logical tables with maintained counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    TitleIndex,
    ArticleContent,
    TitleIndexCache,
    WriteTasks,
    CompletedTasks,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::TitleIndex,
        Table::ArticleContent,
        Table::TitleIndexCache,
        Table::WriteTasks,
        Table::CompletedTasks,
    ];

    /// Name used in `tableCounters`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::TitleIndex => "titleIndex",
            Table::ArticleContent => "articleContent",
            Table::TitleIndexCache => "titleIndexCache",
            Table::WriteTasks => "writeTasks",
            Table::CompletedTasks => "completedTasks",
        }
    }
}

/// Ledger answer for a task id.
#[derive(Debug, Clone)]
pub enum LedgerLookup {
    Pending(Box<WriteTask>),
    Completed,
    Missing,
}

/// Outcome of a title-index insert.
#[derive(Debug, Clone)]
pub struct InsertedTitle {
    pub entry: TitleIndexEntry,
    /// Rows removed by LRU eviction to make room.
    pub evicted: u64,
    /// An older row for the same title was replaced.
    pub replaced: bool,
}

/// Counter vs. real row count for one table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDiagnostics {
    pub table: String,
    pub counter: i64,
    pub actual: i64,
}

/// Debug introspection of a store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDiagnostics {
    pub tables: Vec<TableDiagnostics>,
    pub schema_objects: Vec<String>,
}

impl StoreDiagnostics {
    /// Tables whose maintained counter disagrees with the real row count.
    pub fn drifted(&self) -> Vec<&TableDiagnostics> {
        self.tables.iter().filter(|t| t.counter != t.actual).collect()
    }
}

/// Strictly increasing millisecond clock.
///
/// Wall-clock milliseconds, bumped by one whenever two reads would collide,
/// so `createdAt` and `lastAccess` order rows deterministically.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn starting_after(floor: i64) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    pub fn now_millis(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Per-tenant local store used by the push coordinator.
///
/// | Area | Methods |
/// |------|---------|
/// | `kvMeta` | [`load_state`](IndexStore::load_state), [`save_state`](IndexStore::save_state), [`get_meta`](IndexStore::get_meta), [`put_meta`](IndexStore::put_meta) |
/// | `titleIndex` | [`insert_title`](IndexStore::insert_title), [`title_by_hash`](IndexStore::title_by_hash), [`title_by_id`](IndexStore::title_by_id), [`list_titles`](IndexStore::list_titles), [`delete_title`](IndexStore::delete_title) |
/// | flush buffer | [`buffer_title`](IndexStore::buffer_title), [`buffered_titles`](IndexStore::buffered_titles), [`clear_buffer`](IndexStore::clear_buffer) |
/// | `articleContent` | `insert_article`, `article_by_*`, `list_articles*`, `update_article`, `delete_article` |
/// | ledger | [`put_task`](IndexStore::put_task), [`lookup_task`](IndexStore::lookup_task), [`complete_task`](IndexStore::complete_task), [`pending_tasks`](IndexStore::pending_tasks) |
#[async_trait]
pub trait IndexStore: Send + Sync {
    fn limits(&self) -> StoreLimits;

    /// Coordinator counters, or `None` before first initialization.
    async fn load_state(&self) -> Result<Option<CoordinatorState>>;

    async fn save_state(&self, state: &CoordinatorState) -> Result<()>;

    /// Free-form `kvMeta` value.
    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    async fn put_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Insert a title mapping, evicting least-recently-accessed rows first if
    /// the insert would exceed the cap. An existing row for the same hash is
    /// replaced by a fresh one.
    async fn insert_title(&self, entry: NewTitleEntry) -> Result<InsertedTitle>;

    /// Point lookup; bumps `lastAccess` on hit.
    async fn title_by_hash(&self, hash_of_title: &str) -> Result<Option<TitleIndexEntry>>;

    /// Point lookup; bumps `lastAccess` on hit.
    async fn title_by_id(&self, id: &str) -> Result<Option<TitleIndexEntry>>;

    /// Most recently accessed first. Does not bump `lastAccess`.
    async fn list_titles(&self, limit: i64) -> Result<Vec<TitleIndexEntry>>;

    async fn delete_title(&self, hash_of_title: &str) -> Result<bool>;

    async fn buffer_title(&self, entry: &TitleIndexCacheEntry) -> Result<()>;

    /// All buffered lines, newest first.
    async fn buffered_titles(&self) -> Result<Vec<TitleIndexCacheEntry>>;

    /// Drop the whole buffer. Returns the number of rows removed.
    async fn clear_buffer(&self) -> Result<u64>;

    /// Insert an article, evicting the oldest rows by `createdAt` on overflow.
    async fn insert_article(&self, title: &str, content: &str) -> Result<ArticleContentEntry>;

    async fn article_by_id(&self, id: &str) -> Result<Option<ArticleContentEntry>>;

    /// Newest article with exactly this title.
    async fn article_by_title(&self, title: &str) -> Result<Option<ArticleContentEntry>>;

    /// Newest first.
    async fn list_articles(&self, limit: i64) -> Result<Vec<ArticleContentEntry>>;

    /// 1-based page of articles, newest first. `page_size` must be in
    /// `1..=MAX_PAGE_SIZE`.
    async fn list_articles_page(&self, page: i64, page_size: i64) -> Result<ArticlePage>;

    async fn update_article(&self, id: &str, title: &str, content: &str) -> Result<bool>;

    async fn delete_article(&self, id: &str) -> Result<bool>;

    async fn put_task(&self, task: &WriteTask) -> Result<()>;

    async fn lookup_task(&self, task_id: &str) -> Result<LedgerLookup>;

    /// Remove the ledger entry and record a completion tombstone.
    async fn complete_task(&self, task_id: &str) -> Result<()>;

    /// Retained tasks, oldest first.
    async fn pending_tasks(&self) -> Result<Vec<WriteTask>>;

    /// O(1) maintained row count.
    async fn count(&self, table: Table) -> Result<i64>;

    /// Clear every row and counter; schema and indexes stay.
    async fn reset(&self) -> Result<()>;

    async fn inspect(&self) -> Result<StoreDiagnostics>;
}

/// Validate pagination arguments shared by every backend.
pub fn check_page(page: i64, page_size: i64) -> Result<()> {
    if page < 1 {
        anyhow::bail!("invalid page: {page} (pages start at 1)");
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        anyhow::bail!("invalid page_size: {page_size} (must be 1..={MAX_PAGE_SIZE})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_repeats() {
        let clock = MonotonicClock::default();
        let mut prev = clock.now_millis();
        for _ in 0..1000 {
            let next = clock.now_millis();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_monotonic_clock_respects_floor() {
        let far_future = chrono::Utc::now().timestamp_millis() + 1_000_000;
        let clock = MonotonicClock::starting_after(far_future);
        assert_eq!(clock.now_millis(), far_future + 1);
    }

    #[test]
    fn test_check_page_bounds() {
        assert!(check_page(1, 10).is_ok());
        assert!(check_page(0, 10).is_err());
        assert!(check_page(1, 0).is_err());
        assert!(check_page(1, MAX_PAGE_SIZE + 1).is_err());
    }
}
