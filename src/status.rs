//! Index status and debug introspection.
//!
//! `gv status` prints the tenant's counters and capacities; `gv debug`
//! compares every maintained counter with a real `COUNT(*)` and lists the
//! schema objects, to spot counter drift after a crash or manual edit.

use anyhow::Result;

use gitvault_core::models::IndexStatus;
use gitvault_core::store::StoreDiagnostics;

use crate::config::Config;
use crate::coordinator::CoordinatorHandle;

pub async fn run_status(config: &Config, handle: &CoordinatorHandle) -> Result<()> {
    let status = handle.index_status().await?;
    let db_path = config.tenant_db_path(handle.tenant());
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("gitvault: Index Status ({})", status.tenant);
    println!("==============================");
    println!();
    println!("  Database:      {}", db_path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    print_counters(&status);
    Ok(())
}

fn print_counters(status: &IndexStatus) {
    let s = &status.state;
    println!(
        "  Shard:         Folder_{} / Article_{}",
        s.folder_index_in_vault, s.file_index_in_folder
    );
    println!(
        "  Title file:    TitleIndex_{} ({} entries)",
        s.index_of_title_index_files, s.current_title_index_count
    );
    println!();
    println!(
        "  Titles:        {} / {} ({}%)",
        status.title_entries,
        status.max_title_entries,
        percent(status.title_entries, status.max_title_entries)
    );
    println!(
        "  Articles:      {} / {} ({}%)",
        status.articles,
        status.max_articles,
        percent(status.articles, status.max_articles)
    );
    println!(
        "  Buffered:      {} (flush at {})",
        status.buffered_entries, status.flush_threshold
    );
    println!("  Pending tasks: {}", status.pending_tasks);
    println!();
}

pub async fn run_debug(handle: &CoordinatorHandle) -> Result<()> {
    let diagnostics = handle.inspect().await?;
    print_diagnostics(handle.tenant(), &diagnostics);
    Ok(())
}

fn print_diagnostics(tenant: &str, diagnostics: &StoreDiagnostics) {
    println!("gitvault: Store Diagnostics ({})", tenant);
    println!();
    println!("  {:<20} {:>10} {:>10}   {}", "TABLE", "COUNTER", "ROWS", "");
    println!("  {}", "-".repeat(50));
    for t in &diagnostics.tables {
        let flag = if t.counter == t.actual { "" } else { "DRIFT" };
        println!(
            "  {:<20} {:>10} {:>10}   {}",
            t.table, t.counter, t.actual, flag
        );
    }
    println!();
    println!("  Schema objects:");
    for name in &diagnostics.schema_objects {
        println!("    {}", name);
    }
    let drifted = diagnostics.drifted();
    println!();
    if drifted.is_empty() {
        println!("  Counters consistent.");
    } else {
        println!("  {} table(s) drifted.", drifted.len());
    }
}

fn percent(n: i64, of: i64) -> i64 {
    if of > 0 {
        (n * 100) / of
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_percent_handles_zero_capacity() {
        assert_eq!(percent(5, 0), 0);
        assert_eq!(percent(250, 1000), 25);
    }
}
