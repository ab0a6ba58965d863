//! Article listing and title lookup.
//!
//! Reads the tenant's local cache only; the remote store is never queried.

use anyhow::Result;

use crate::coordinator::CoordinatorHandle;

pub async fn run_articles(handle: &CoordinatorHandle, page: i64, page_size: i64) -> Result<()> {
    let result = handle.list_articles(page, page_size).await?;
    let pages = if result.total == 0 {
        0
    } else {
        (result.total + page_size - 1) / page_size
    };

    println!(
        "Articles for {} (page {} of {}, {} total)",
        handle.tenant(),
        result.page,
        pages,
        result.total
    );
    if result.articles.is_empty() {
        println!("No articles.");
        return Ok(());
    }
    println!();
    println!("  {:<36} {:<20} {}", "ID", "CREATED", "TITLE");
    println!("  {}", "-".repeat(76));
    for a in &result.articles {
        let title = if a.title.is_empty() {
            "(untitled)"
        } else {
            a.title.as_str()
        };
        println!("  {:<36} {:<20} {}", a.id, format_ts(a.created_at), title);
    }
    println!();
    Ok(())
}

pub async fn run_lookup(handle: &CoordinatorHandle, title: &str) -> Result<()> {
    let entry = handle.lookup_title(title).await?;
    println!("title:    {}", entry.title);
    println!("hash:     {}", entry.hash_of_title);
    println!("path:     {}", entry.remote_article_path);
    println!("created:  {}", format_ts(entry.created_at));
    Ok(())
}

fn format_ts(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
