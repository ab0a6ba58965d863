//! Per-tenant schema.
//!
//! Every statement is `IF NOT EXISTS` / `INSERT OR IGNORE`, so running the
//! migrations against an existing database is a no-op.

use anyhow::Result;
use sqlx::SqlitePool;

use gitvault_core::store::Table;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Scalar coordinator state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kvMeta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Title → remote path, LRU-bounded
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS titleIndex (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            hashOfTitle TEXT NOT NULL UNIQUE,
            remoteArticlePath TEXT NOT NULL,
            createdAt INTEGER NOT NULL,
            lastAccess INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cached bodies, FIFO-bounded
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articleContent (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            createdAt INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Flush buffer
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS titleIndexCache (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            hashOfTitle TEXT NOT NULL,
            remoteArticlePath TEXT NOT NULL,
            repoOwner TEXT NOT NULL DEFAULT '',
            repoName TEXT NOT NULL DEFAULT '',
            repoBranch TEXT NOT NULL DEFAULT '',
            indexFilePath TEXT NOT NULL,
            createdAt INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    add_buffer_repo_columns(pool).await?;

    // Task ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS writeTasks (
            taskId TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            createdAt INTEGER NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completedTasks (
            taskId TEXT PRIMARY KEY,
            completedAt INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tableCounters (
            tableName TEXT PRIMARY KEY,
            count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_titleIndex_hash ON titleIndex(hashOfTitle)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_titleIndex_lastAccess ON titleIndex(lastAccess, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_articleContent_title ON articleContent(title)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_articleContent_createdAt ON articleContent(createdAt, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_writeTasks_createdAt ON writeTasks(createdAt, taskId)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_completedTasks_completedAt ON completedTasks(completedAt, taskId)",
    )
    .execute(pool)
    .await?;

    for table in Table::ALL {
        sqlx::query("INSERT OR IGNORE INTO tableCounters (tableName, count) VALUES (?, 0)")
            .bind(table.as_str())
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Databases created before buffered lines carried their repository get the
/// repo columns added, and existing rows are attributed to the last
/// recorded remote target. SQLite has no `ADD COLUMN IF NOT EXISTS`, so the
/// columns are checked first.
async fn add_buffer_repo_columns(pool: &SqlitePool) -> Result<()> {
    let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as("PRAGMA table_info(titleIndexCache)")
            .fetch_all(pool)
            .await?;
    if columns.iter().any(|(_, name, _, _, _, _)| name == "repoOwner") {
        return Ok(());
    }

    for column in ["repoOwner", "repoName", "repoBranch"] {
        sqlx::query(&format!(
            "ALTER TABLE titleIndexCache ADD COLUMN {} TEXT NOT NULL DEFAULT ''",
            column
        ))
        .execute(pool)
        .await?;
    }
    sqlx::query(
        r#"
        UPDATE titleIndexCache SET
            repoOwner = COALESCE((SELECT json_extract(value, '$.repo.owner') FROM kvMeta WHERE key = 'remoteTarget'), ''),
            repoName = COALESCE((SELECT json_extract(value, '$.repo.repo') FROM kvMeta WHERE key = 'remoteTarget'), ''),
            repoBranch = COALESCE((SELECT json_extract(value, '$.repo.branch') FROM kvMeta WHERE key = 'remoteTarget'), '')
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
