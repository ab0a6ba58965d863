//! SQLite-backed [`IndexStore`] implementation.
//!
//! One database file per tenant (see [`crate::migrate`] for the schema).
//! Every mutation that changes a table's row count also adjusts that table's
//! row in `tableCounters` inside the same transaction, so counters can be
//! read without scanning and can never drift from a half-applied write.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use gitvault_core::models::{
    ArticleContentEntry, ArticlePage, CoordinatorState, NewTitleEntry, RepoCoordinates,
    TitleIndexCacheEntry, TitleIndexEntry, WriteTask,
};
use gitvault_core::store::{
    check_page, IndexStore, InsertedTitle, LedgerLookup, MonotonicClock, StoreDiagnostics,
    StoreLimits, Table, TableDiagnostics,
};

use crate::{db, migrate};

const STATE_KEY: &str = "coordinatorState";

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteIndexStore {
    pool: SqlitePool,
    limits: StoreLimits,
    clock: MonotonicClock,
}

impl SqliteIndexStore {
    /// Open (creating if needed) a tenant database and bring its schema up to date.
    pub async fn open(db_path: &Path, limits: StoreLimits) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool)
            .await
            .with_context(|| format!("Failed to migrate {}", db_path.display()))?;
        Self::new(pool, limits).await
    }

    /// Wrap an already-migrated pool.
    ///
    /// The clock is seeded past every stored timestamp so rows written after
    /// a restart still sort after the ones written before it.
    pub async fn new(pool: SqlitePool, limits: StoreLimits) -> Result<Self> {
        let floor: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(v) FROM (
                SELECT MAX(lastAccess) AS v FROM titleIndex
                UNION ALL SELECT MAX(createdAt) FROM articleContent
                UNION ALL SELECT MAX(createdAt) FROM titleIndexCache
                UNION ALL SELECT MAX(createdAt) FROM writeTasks
                UNION ALL SELECT MAX(completedAt) FROM completedTasks
            )
            "#,
        )
        .fetch_one(&pool)
        .await?;

        Ok(Self {
            pool,
            limits,
            clock: MonotonicClock::starting_after(floor.unwrap_or(0)),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn read_counter(conn: &mut SqliteConnection, table: Table) -> Result<i64> {
    let count: Option<i64> =
        sqlx::query_scalar("SELECT count FROM tableCounters WHERE tableName = ?")
            .bind(table.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(count.unwrap_or(0))
}

async fn adjust_counter(conn: &mut SqliteConnection, table: Table, delta: i64) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO tableCounters (tableName, count) VALUES (?, ?)
        ON CONFLICT(tableName) DO UPDATE SET count = count + excluded.count
        "#,
    )
    .bind(table.as_str())
    .bind(delta)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn title_from_row(row: &SqliteRow) -> TitleIndexEntry {
    TitleIndexEntry {
        id: row.get("id"),
        title: row.get("title"),
        hash_of_title: row.get("hashOfTitle"),
        remote_article_path: row.get("remoteArticlePath"),
        created_at: row.get("createdAt"),
        last_access: row.get("lastAccess"),
    }
}

fn article_from_row(row: &SqliteRow) -> ArticleContentEntry {
    ArticleContentEntry {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        created_at: row.get("createdAt"),
    }
}

const TITLE_COLUMNS: &str = "id, title, hashOfTitle, remoteArticlePath, createdAt, lastAccess";

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn limits(&self) -> StoreLimits {
        self.limits
    }

    async fn load_state(&self) -> Result<Option<CoordinatorState>> {
        match self.get_meta(STATE_KEY).await? {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .with_context(|| "Corrupt coordinator state in kvMeta")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &CoordinatorState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.put_meta(STATE_KEY, &json).await
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM kvMeta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kvMeta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_title(&self, entry: NewTitleEntry) -> Result<InsertedTitle> {
        let now = self.clock.now_millis();
        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query("DELETE FROM titleIndex WHERE hashOfTitle = ?")
            .bind(&entry.hash_of_title)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        adjust_counter(&mut tx, Table::TitleIndex, -(replaced as i64)).await?;

        let count = read_counter(&mut tx, Table::TitleIndex).await?;
        let mut evicted = 0u64;
        if count + 1 > self.limits.max_title_entries {
            let excess = count - self.limits.max_title_entries + 1;
            evicted = sqlx::query(
                r#"
                DELETE FROM titleIndex WHERE id IN (
                    SELECT id FROM titleIndex ORDER BY lastAccess ASC, id ASC LIMIT ?
                )
                "#,
            )
            .bind(excess)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            adjust_counter(&mut tx, Table::TitleIndex, -(evicted as i64)).await?;
        }

        let row = TitleIndexEntry {
            id: Uuid::new_v4().to_string(),
            title: entry.title,
            hash_of_title: entry.hash_of_title,
            remote_article_path: entry.remote_article_path,
            created_at: now,
            last_access: now,
        };
        sqlx::query(
            r#"
            INSERT INTO titleIndex (id, title, hashOfTitle, remoteArticlePath, createdAt, lastAccess)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.title)
        .bind(&row.hash_of_title)
        .bind(&row.remote_article_path)
        .bind(row.created_at)
        .bind(row.last_access)
        .execute(&mut *tx)
        .await?;
        adjust_counter(&mut tx, Table::TitleIndex, 1).await?;

        tx.commit().await?;

        if evicted > 0 {
            tracing::debug!(evicted, "title index LRU eviction");
        }
        Ok(InsertedTitle {
            entry: row,
            evicted,
            replaced: replaced > 0,
        })
    }

    async fn title_by_hash(&self, hash_of_title: &str) -> Result<Option<TitleIndexEntry>> {
        let now = self.clock.now_millis();
        let row = sqlx::query(&format!(
            "UPDATE titleIndex SET lastAccess = ? WHERE hashOfTitle = ? RETURNING {TITLE_COLUMNS}"
        ))
        .bind(now)
        .bind(hash_of_title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(title_from_row))
    }

    async fn title_by_id(&self, id: &str) -> Result<Option<TitleIndexEntry>> {
        let now = self.clock.now_millis();
        let row = sqlx::query(&format!(
            "UPDATE titleIndex SET lastAccess = ? WHERE id = ? RETURNING {TITLE_COLUMNS}"
        ))
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(title_from_row))
    }

    async fn list_titles(&self, limit: i64) -> Result<Vec<TitleIndexEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {TITLE_COLUMNS} FROM titleIndex ORDER BY lastAccess DESC, id DESC LIMIT ?"
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(title_from_row).collect())
    }

    async fn delete_title(&self, hash_of_title: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let n = sqlx::query("DELETE FROM titleIndex WHERE hashOfTitle = ?")
            .bind(hash_of_title)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        adjust_counter(&mut tx, Table::TitleIndex, -(n as i64)).await?;
        tx.commit().await?;
        Ok(n > 0)
    }

    async fn buffer_title(&self, entry: &TitleIndexCacheEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let n = sqlx::query(
            r#"
            INSERT OR IGNORE INTO titleIndexCache
                (id, title, hashOfTitle, remoteArticlePath,
                 repoOwner, repoName, repoBranch, indexFilePath, createdAt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.title)
        .bind(&entry.hash_of_title)
        .bind(&entry.remote_article_path)
        .bind(&entry.repo.owner)
        .bind(&entry.repo.repo)
        .bind(&entry.repo.branch)
        .bind(&entry.index_file_path)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        adjust_counter(&mut tx, Table::TitleIndexCache, n as i64).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn buffered_titles(&self) -> Result<Vec<TitleIndexCacheEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, hashOfTitle, remoteArticlePath,
                   repoOwner, repoName, repoBranch, indexFilePath, createdAt
            FROM titleIndexCache
            ORDER BY createdAt DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| TitleIndexCacheEntry {
                id: row.get("id"),
                title: row.get("title"),
                hash_of_title: row.get("hashOfTitle"),
                remote_article_path: row.get("remoteArticlePath"),
                repo: RepoCoordinates {
                    owner: row.get("repoOwner"),
                    repo: row.get("repoName"),
                    branch: row.get("repoBranch"),
                },
                index_file_path: row.get("indexFilePath"),
                created_at: row.get("createdAt"),
            })
            .collect())
    }

    async fn clear_buffer(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let n = sqlx::query("DELETE FROM titleIndexCache")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("UPDATE tableCounters SET count = 0 WHERE tableName = ?")
            .bind(Table::TitleIndexCache.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(n)
    }

    async fn insert_article(&self, title: &str, content: &str) -> Result<ArticleContentEntry> {
        let now = self.clock.now_millis();
        let mut tx = self.pool.begin().await?;

        let count = read_counter(&mut tx, Table::ArticleContent).await?;
        if count + 1 > self.limits.max_articles {
            let excess = count - self.limits.max_articles + 1;
            let evicted = sqlx::query(
                r#"
                DELETE FROM articleContent WHERE id IN (
                    SELECT id FROM articleContent ORDER BY createdAt ASC, id ASC LIMIT ?
                )
                "#,
            )
            .bind(excess)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            adjust_counter(&mut tx, Table::ArticleContent, -(evicted as i64)).await?;
        }

        let row = ArticleContentEntry {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
        };
        sqlx::query("INSERT INTO articleContent (id, title, content, createdAt) VALUES (?, ?, ?, ?)")
            .bind(&row.id)
            .bind(&row.title)
            .bind(&row.content)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await?;
        adjust_counter(&mut tx, Table::ArticleContent, 1).await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn article_by_id(&self, id: &str) -> Result<Option<ArticleContentEntry>> {
        let row = sqlx::query("SELECT id, title, content, createdAt FROM articleContent WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(article_from_row))
    }

    async fn article_by_title(&self, title: &str) -> Result<Option<ArticleContentEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, content, createdAt FROM articleContent
            WHERE title = ?
            ORDER BY createdAt DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(article_from_row))
    }

    async fn list_articles(&self, limit: i64) -> Result<Vec<ArticleContentEntry>> {
        let rows = sqlx::query(
            "SELECT id, title, content, createdAt FROM articleContent ORDER BY createdAt DESC, id DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(article_from_row).collect())
    }

    async fn list_articles_page(&self, page: i64, page_size: i64) -> Result<ArticlePage> {
        check_page(page, page_size)?;
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, createdAt FROM articleContent
            ORDER BY createdAt DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;
        let total = self.count(Table::ArticleContent).await?;
        Ok(ArticlePage {
            page,
            page_size,
            total,
            articles: rows.iter().map(article_from_row).collect(),
        })
    }

    async fn update_article(&self, id: &str, title: &str, content: &str) -> Result<bool> {
        let n = sqlx::query("UPDATE articleContent SET title = ?, content = ? WHERE id = ?")
            .bind(title)
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(n > 0)
    }

    async fn delete_article(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let n = sqlx::query("DELETE FROM articleContent WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        adjust_counter(&mut tx, Table::ArticleContent, -(n as i64)).await?;
        tx.commit().await?;
        Ok(n > 0)
    }

    async fn put_task(&self, task: &WriteTask) -> Result<()> {
        let now = self.clock.now_millis();
        let payload = serde_json::to_string(task)?;
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO writeTasks (taskId, payload, createdAt, completed) VALUES (?, ?, ?, ?)",
        )
        .bind(&task.task_id)
        .bind(&payload)
        .bind(now)
        .bind(task.completed)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            sqlx::query("UPDATE writeTasks SET payload = ?, completed = ? WHERE taskId = ?")
                .bind(&payload)
                .bind(task.completed)
                .bind(&task.task_id)
                .execute(&mut *tx)
                .await?;
        }
        adjust_counter(&mut tx, Table::WriteTasks, inserted as i64).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn lookup_task(&self, task_id: &str) -> Result<LedgerLookup> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM writeTasks WHERE taskId = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(json) = payload {
            let task: WriteTask = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt ledger entry for task {}", task_id))?;
            return Ok(LedgerLookup::Pending(Box::new(task)));
        }

        let done: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM completedTasks WHERE taskId = ?")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(if done {
            LedgerLookup::Completed
        } else {
            LedgerLookup::Missing
        })
    }

    async fn complete_task(&self, task_id: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM writeTasks WHERE taskId = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        adjust_counter(&mut tx, Table::WriteTasks, -(removed as i64)).await?;

        let recorded = sqlx::query(
            "INSERT OR IGNORE INTO completedTasks (taskId, completedAt) VALUES (?, ?)",
        )
        .bind(task_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        adjust_counter(&mut tx, Table::CompletedTasks, recorded as i64).await?;

        let count = read_counter(&mut tx, Table::CompletedTasks).await?;
        if count > self.limits.max_completed_tasks {
            let dropped = sqlx::query(
                r#"
                DELETE FROM completedTasks WHERE taskId IN (
                    SELECT taskId FROM completedTasks ORDER BY completedAt ASC, taskId ASC LIMIT ?
                )
                "#,
            )
            .bind(count - self.limits.max_completed_tasks)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            adjust_counter(&mut tx, Table::CompletedTasks, -(dropped as i64)).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn pending_tasks(&self) -> Result<Vec<WriteTask>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT taskId, payload FROM writeTasks ORDER BY createdAt ASC, taskId ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, json)| {
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt ledger entry for task {}", id))
            })
            .collect()
    }

    async fn count(&self, table: Table) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        read_counter(&mut conn, table).await
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in Table::ALL {
            sqlx::query(&format!("DELETE FROM {}", table.as_str()))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM kvMeta").execute(&mut *tx).await?;
        sqlx::query("UPDATE tableCounters SET count = 0")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn inspect(&self) -> Result<StoreDiagnostics> {
        let mut conn = self.pool.acquire().await?;
        let mut tables = Vec::new();
        for table in Table::ALL {
            let counter = read_counter(&mut conn, table).await?;
            let actual: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.as_str()))
                .fetch_one(&mut *conn)
                .await?;
            tables.push(TableDiagnostics {
                table: table.as_str().to_string(),
                counter,
                actual,
            });
        }

        let schema_objects: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type IN ('table', 'index') AND name NOT LIKE 'sqlite_%'
            ORDER BY type DESC, name ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(StoreDiagnostics {
            tables,
            schema_objects,
        })
    }
}
