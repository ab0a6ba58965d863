//! Remote title-index file codec.
//!
//! A title-index file is JSON Lines, newest entries first:
//!
//! ```text
//! {"title":"Second","hashOfTitle":"…","remoteArticlePath":"vault/Folder_0/Article_1.md","createdAt":1700000000100}
//! {"title":"First","hashOfTitle":"…","remoteArticlePath":"vault/Folder_0/Article_0.md","createdAt":1700000000000}
//! ```
//!
//! A flush prepends one block of buffered lines to whatever the remote file
//! currently holds. Lines already present (same hash and path) are skipped, so
//! re-merging a block that already landed leaves the file unchanged.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::TitleIndexCacheEntry;

/// One line of a title-index file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexLine {
    pub title: String,
    pub hash_of_title: String,
    pub remote_article_path: String,
    pub created_at: i64,
}

impl From<&TitleIndexCacheEntry> for IndexLine {
    fn from(entry: &TitleIndexCacheEntry) -> Self {
        Self {
            title: entry.title.clone(),
            hash_of_title: entry.hash_of_title.clone(),
            remote_article_path: entry.remote_article_path.clone(),
            created_at: entry.created_at,
        }
    }
}

/// Result of merging a block into existing file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedIndex {
    pub content: String,
    /// Lines actually added; `0` means the remote file already had them all.
    pub added: usize,
}

/// Parse the recognizable lines of an index file. Unparseable lines are ignored.
pub fn parse_lines(content: &str) -> Vec<IndexLine> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// Prepend `entries` (sorted newest first) to `existing`.
///
/// Existing content, including lines this codec does not understand, is
/// preserved verbatim below the new block.
pub fn merge_block(existing: &str, entries: &[TitleIndexCacheEntry]) -> MergedIndex {
    let mut seen: HashSet<(String, String)> = parse_lines(existing)
        .into_iter()
        .map(|l| (l.hash_of_title, l.remote_article_path))
        .collect();

    let mut ordered: Vec<&TitleIndexCacheEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut block = String::new();
    let mut added = 0;
    for entry in ordered {
        let key = (entry.hash_of_title.clone(), entry.remote_article_path.clone());
        if !seen.insert(key) {
            continue;
        }
        // IndexLine holds only strings and integers; serialization cannot fail.
        if let Ok(line) = serde_json::to_string(&IndexLine::from(entry)) {
            block.push_str(&line);
            block.push('\n');
            added += 1;
        }
    }

    let rest = existing.trim_start_matches('\n');
    let mut content = block;
    content.push_str(rest);
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    MergedIndex { content, added }
}
