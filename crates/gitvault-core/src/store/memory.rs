//! In-memory [`IndexStore`] implementation for tests.
//!
//! Everything lives in one `Mutex`-guarded struct, so each operation is
//! atomic. Counters are kept alongside the collections exactly like the
//! SQLite backend's `tableCounters` rows.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ArticleContentEntry, ArticlePage, CoordinatorState, NewTitleEntry, TitleIndexCacheEntry,
    TitleIndexEntry, WriteTask,
};

use super::{
    check_page, IndexStore, InsertedTitle, LedgerLookup, MonotonicClock, StoreDiagnostics,
    StoreLimits, Table, TableDiagnostics,
};

#[derive(Default)]
struct Inner {
    state: Option<CoordinatorState>,
    meta: HashMap<String, String>,
    titles: HashMap<String, TitleIndexEntry>,
    articles: Vec<ArticleContentEntry>,
    buffer: Vec<TitleIndexCacheEntry>,
    tasks: Vec<WriteTask>,
    completed: VecDeque<String>,
    counters: HashMap<Table, i64>,
}

impl Inner {
    fn bump(&mut self, table: Table, delta: i64) {
        *self.counters.entry(table).or_insert(0) += delta;
    }

    fn counter(&self, table: Table) -> i64 {
        self.counters.get(&table).copied().unwrap_or(0)
    }

    fn actual(&self, table: Table) -> i64 {
        let n = match table {
            Table::TitleIndex => self.titles.len(),
            Table::ArticleContent => self.articles.len(),
            Table::TitleIndexCache => self.buffer.len(),
            Table::WriteTasks => self.tasks.len(),
            Table::CompletedTasks => self.completed.len(),
        };
        n as i64
    }
}

/// In-memory store for tests.
pub struct InMemoryIndexStore {
    inner: Mutex<Inner>,
    limits: StoreLimits,
    clock: MonotonicClock,
}

impl InMemoryIndexStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            limits,
            clock: MonotonicClock::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("in-memory index store lock poisoned"))
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    fn limits(&self) -> StoreLimits {
        self.limits
    }

    async fn load_state(&self) -> Result<Option<CoordinatorState>> {
        Ok(self.lock()?.state)
    }

    async fn save_state(&self, state: &CoordinatorState) -> Result<()> {
        self.lock()?.state = Some(*state);
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.meta.get(key).cloned())
    }

    async fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn insert_title(&self, entry: NewTitleEntry) -> Result<InsertedTitle> {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;

        let replaced = inner.titles.remove(&entry.hash_of_title).is_some();
        if replaced {
            inner.bump(Table::TitleIndex, -1);
        }

        let count = inner.counter(Table::TitleIndex);
        let mut evicted = 0u64;
        if count + 1 > self.limits.max_title_entries {
            let excess = (count - self.limits.max_title_entries + 1) as usize;
            let mut by_access: Vec<(i64, String, String)> = inner
                .titles
                .values()
                .map(|t| (t.last_access, t.id.clone(), t.hash_of_title.clone()))
                .collect();
            by_access.sort();
            for (_, _, hash) in by_access.into_iter().take(excess) {
                inner.titles.remove(&hash);
                evicted += 1;
            }
            inner.bump(Table::TitleIndex, -(evicted as i64));
        }

        let row = TitleIndexEntry {
            id: Uuid::new_v4().to_string(),
            title: entry.title,
            hash_of_title: entry.hash_of_title.clone(),
            remote_article_path: entry.remote_article_path,
            created_at: now,
            last_access: now,
        };
        inner.titles.insert(entry.hash_of_title, row.clone());
        inner.bump(Table::TitleIndex, 1);

        Ok(InsertedTitle {
            entry: row,
            evicted,
            replaced,
        })
    }

    async fn title_by_hash(&self, hash_of_title: &str) -> Result<Option<TitleIndexEntry>> {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;
        Ok(inner.titles.get_mut(hash_of_title).map(|t| {
            t.last_access = now;
            t.clone()
        }))
    }

    async fn title_by_id(&self, id: &str) -> Result<Option<TitleIndexEntry>> {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;
        Ok(inner.titles.values_mut().find(|t| t.id == id).map(|t| {
            t.last_access = now;
            t.clone()
        }))
    }

    async fn list_titles(&self, limit: i64) -> Result<Vec<TitleIndexEntry>> {
        let inner = self.lock()?;
        let mut rows: Vec<TitleIndexEntry> = inner.titles.values().cloned().collect();
        rows.sort_by(|a, b| b.last_access.cmp(&a.last_access).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn delete_title(&self, hash_of_title: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let removed = inner.titles.remove(hash_of_title).is_some();
        if removed {
            inner.bump(Table::TitleIndex, -1);
        }
        Ok(removed)
    }

    async fn buffer_title(&self, entry: &TitleIndexCacheEntry) -> Result<()> {
        let mut inner = self.lock()?;
        inner.buffer.push(entry.clone());
        inner.bump(Table::TitleIndexCache, 1);
        Ok(())
    }

    async fn buffered_titles(&self) -> Result<Vec<TitleIndexCacheEntry>> {
        let inner = self.lock()?;
        let mut rows = inner.buffer.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn clear_buffer(&self) -> Result<u64> {
        let mut inner = self.lock()?;
        let n = inner.buffer.len() as u64;
        inner.buffer.clear();
        inner.counters.insert(Table::TitleIndexCache, 0);
        Ok(n)
    }

    async fn insert_article(&self, title: &str, content: &str) -> Result<ArticleContentEntry> {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;

        let count = inner.counter(Table::ArticleContent);
        if count + 1 > self.limits.max_articles {
            let excess = (count - self.limits.max_articles + 1) as usize;
            inner
                .articles
                .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            let excess = excess.min(inner.articles.len());
            inner.articles.drain(..excess);
            inner.bump(Table::ArticleContent, -(excess as i64));
        }

        let row = ArticleContentEntry {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
        };
        inner.articles.push(row.clone());
        inner.bump(Table::ArticleContent, 1);
        Ok(row)
    }

    async fn article_by_id(&self, id: &str) -> Result<Option<ArticleContentEntry>> {
        let inner = self.lock()?;
        Ok(inner.articles.iter().find(|a| a.id == id).cloned())
    }

    async fn article_by_title(&self, title: &str) -> Result<Option<ArticleContentEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .articles
            .iter()
            .filter(|a| a.title == title)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn list_articles(&self, limit: i64) -> Result<Vec<ArticleContentEntry>> {
        let inner = self.lock()?;
        let mut rows = inner.articles.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_articles_page(&self, page: i64, page_size: i64) -> Result<ArticlePage> {
        check_page(page, page_size)?;
        let inner = self.lock()?;
        let mut rows = inner.articles.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let articles = rows
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .collect();
        Ok(ArticlePage {
            page,
            page_size,
            total: inner.counter(Table::ArticleContent),
            articles,
        })
    }

    async fn update_article(&self, id: &str, title: &str, content: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.articles.iter_mut().find(|a| a.id == id) {
            Some(a) => {
                a.title = title.to_string();
                a.content = content.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_article(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let before = inner.articles.len();
        inner.articles.retain(|a| a.id != id);
        let removed = inner.articles.len() < before;
        if removed {
            inner.bump(Table::ArticleContent, -1);
        }
        Ok(removed)
    }

    async fn put_task(&self, task: &WriteTask) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.tasks.iter_mut().find(|t| t.task_id == task.task_id) {
            *existing = task.clone();
        } else {
            inner.tasks.push(task.clone());
            inner.bump(Table::WriteTasks, 1);
        }
        Ok(())
    }

    async fn lookup_task(&self, task_id: &str) -> Result<LedgerLookup> {
        let inner = self.lock()?;
        if let Some(task) = inner.tasks.iter().find(|t| t.task_id == task_id) {
            return Ok(LedgerLookup::Pending(Box::new(task.clone())));
        }
        if inner.completed.iter().any(|id| id == task_id) {
            return Ok(LedgerLookup::Completed);
        }
        Ok(LedgerLookup::Missing)
    }

    async fn complete_task(&self, task_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.task_id != task_id);
        if inner.tasks.len() < before {
            inner.bump(Table::WriteTasks, -1);
        }
        if !inner.completed.iter().any(|id| id == task_id) {
            inner.completed.push_back(task_id.to_string());
            inner.bump(Table::CompletedTasks, 1);
            while inner.completed.len() as i64 > self.limits.max_completed_tasks {
                inner.completed.pop_front();
                inner.bump(Table::CompletedTasks, -1);
            }
        }
        Ok(())
    }

    async fn pending_tasks(&self) -> Result<Vec<WriteTask>> {
        Ok(self.lock()?.tasks.clone())
    }

    async fn count(&self, table: Table) -> Result<i64> {
        Ok(self.lock()?.counter(table))
    }

    async fn reset(&self) -> Result<()> {
        *self.lock()? = Inner::default();
        Ok(())
    }

    async fn inspect(&self) -> Result<StoreDiagnostics> {
        let inner = self.lock()?;
        let tables = Table::ALL
            .iter()
            .map(|t| TableDiagnostics {
                table: t.as_str().to_string(),
                counter: inner.counter(*t),
                actual: inner.actual(*t),
            })
            .collect();
        Ok(StoreDiagnostics {
            tables,
            schema_objects: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_title;

    fn small(titles: i64, articles: i64) -> InMemoryIndexStore {
        InMemoryIndexStore::new(StoreLimits {
            max_title_entries: titles,
            max_articles: articles,
            max_completed_tasks: 3,
        })
    }

    fn new_title(t: &str) -> NewTitleEntry {
        NewTitleEntry {
            title: t.to_string(),
            hash_of_title: hash_title(t),
            remote_article_path: format!("v/{t}.md"),
        }
    }

    #[tokio::test]
    async fn test_lru_evicts_oldest_access() {
        let store = small(3, 10);
        for t in ["a", "b", "c"] {
            store.insert_title(new_title(t)).await.unwrap();
        }
        let inserted = store.insert_title(new_title("d")).await.unwrap();
        assert_eq!(inserted.evicted, 1);
        assert!(store.title_by_hash(&hash_title("a")).await.unwrap().is_none());
        assert_eq!(store.count(Table::TitleIndex).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_protects_from_eviction() {
        let store = small(3, 10);
        for t in ["a", "b", "c"] {
            store.insert_title(new_title(t)).await.unwrap();
        }
        store.title_by_hash(&hash_title("a")).await.unwrap();
        store.insert_title(new_title("d")).await.unwrap();
        assert!(store.title_by_hash(&hash_title("a")).await.unwrap().is_some());
        assert!(store.title_by_hash(&hash_title("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reinsert_same_title_replaces_row() {
        let store = small(3, 10);
        store.insert_title(new_title("a")).await.unwrap();
        let again = store
            .insert_title(NewTitleEntry {
                remote_article_path: "v/other.md".to_string(),
                ..new_title("a")
            })
            .await
            .unwrap();
        assert!(again.replaced);
        assert_eq!(store.count(Table::TitleIndex).await.unwrap(), 1);
        let hit = store.title_by_hash(&hash_title("a")).await.unwrap().unwrap();
        assert_eq!(hit.remote_article_path, "v/other.md");
    }

    #[tokio::test]
    async fn test_articles_fifo_ignores_reads() {
        let store = small(10, 2);
        let first = store.insert_article("one", "1").await.unwrap();
        store.insert_article("two", "2").await.unwrap();
        assert!(store.article_by_id(&first.id).await.unwrap().is_some());
        store.insert_article("three", "3").await.unwrap();
        assert!(store.article_by_id(&first.id).await.unwrap().is_none());
        assert_eq!(store.count(Table::ArticleContent).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_completed_tombstones_are_bounded() {
        let store = small(10, 10);
        for i in 0..5 {
            store.complete_task(&format!("t{i}")).await.unwrap();
        }
        assert_eq!(store.count(Table::CompletedTasks).await.unwrap(), 3);
        assert!(matches!(
            store.lookup_task("t0").await.unwrap(),
            LedgerLookup::Missing
        ));
        assert!(matches!(
            store.lookup_task("t4").await.unwrap(),
            LedgerLookup::Completed
        ));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = small(10, 10);
        store.insert_title(new_title("a")).await.unwrap();
        store.insert_article("a", "body").await.unwrap();
        store.save_state(&CoordinatorState::initial()).await.unwrap();
        store.reset().await.unwrap();
        assert!(store.load_state().await.unwrap().is_none());
        let diag = store.inspect().await.unwrap();
        assert!(diag.tables.iter().all(|t| t.counter == 0 && t.actual == 0));
    }

    #[tokio::test]
    async fn test_update_article_keeps_row_and_created_at() {
        let store = small(10, 10);
        let row = store.insert_article("draft", "v1").await.unwrap();
        assert!(store.update_article(&row.id, "final", "v2").await.unwrap());
        assert!(!store.update_article("missing", "x", "y").await.unwrap());

        let updated = store.article_by_id(&row.id).await.unwrap().unwrap();
        assert_eq!(updated.title, "final");
        assert_eq!(updated.content, "v2");
        assert_eq!(updated.created_at, row.created_at);
        assert_eq!(store.count(Table::ArticleContent).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_article_decrements_counter() {
        let store = small(10, 10);
        let row = store.insert_article("a", "1").await.unwrap();
        store.insert_article("b", "2").await.unwrap();

        assert!(store.delete_article(&row.id).await.unwrap());
        assert!(!store.delete_article(&row.id).await.unwrap());
        assert!(store.article_by_id(&row.id).await.unwrap().is_none());
        assert_eq!(store.count(Table::ArticleContent).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_article_by_title_returns_newest() {
        let store = small(10, 10);
        store.insert_article("same", "old").await.unwrap();
        store.insert_article("other", "x").await.unwrap();
        let newest = store.insert_article("same", "new").await.unwrap();

        let hit = store.article_by_title("same").await.unwrap().unwrap();
        assert_eq!(hit.id, newest.id);
        assert_eq!(hit.content, "new");
        assert!(store.article_by_title("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_title_by_id_protects_from_eviction() {
        let store = small(3, 10);
        let a = store.insert_title(new_title("a")).await.unwrap().entry;
        for t in ["b", "c"] {
            store.insert_title(new_title(t)).await.unwrap();
        }

        let hit = store.title_by_id(&a.id).await.unwrap().unwrap();
        assert!(hit.last_access > a.last_access);
        assert!(store.title_by_id("missing").await.unwrap().is_none());

        store.insert_title(new_title("d")).await.unwrap();
        assert!(store.title_by_hash(&hash_title("a")).await.unwrap().is_some());
        assert!(store.title_by_hash(&hash_title("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_titles_orders_by_access_without_bumping() {
        let store = small(3, 10);
        store.insert_title(new_title("a")).await.unwrap();
        let b = store.insert_title(new_title("b")).await.unwrap().entry;
        store.insert_title(new_title("c")).await.unwrap();
        store.title_by_id(&b.id).await.unwrap();

        let listed = store.list_titles(10).await.unwrap();
        let titles: Vec<&str> = listed.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);
        assert_eq!(store.list_titles(10).await.unwrap(), listed);
        assert_eq!(store.list_titles(1).await.unwrap().len(), 1);

        // Listing did not refresh "a", so it is still the eviction candidate.
        store.insert_title(new_title("d")).await.unwrap();
        assert!(store.title_by_hash(&hash_title("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_title_decrements_counter() {
        let store = small(10, 10);
        store.insert_title(new_title("a")).await.unwrap();
        store.insert_title(new_title("b")).await.unwrap();

        assert!(store.delete_title(&hash_title("a")).await.unwrap());
        assert!(!store.delete_title(&hash_title("a")).await.unwrap());
        assert_eq!(store.count(Table::TitleIndex).await.unwrap(), 1);
    }
}
