//! File location allocator.
//!
//! Computes the next (folder, file) shard coordinates for an article and the
//! title-index file its index line belongs to. Pure and deterministic: the
//! caller owns the counters and persists [`FileLocationResult::advance`].
//!
//! # Rules
//!
//! 1. The first allocation (`folder 0, file -1`) creates folder 0 and
//!    assigns file 0.
//! 2. When `file + 1 >= max_files_per_folder` the allocation rolls to the
//!    next folder at file 0 and flags folder creation.
//! 3. Title-index rotation is independent of content rotation: when the
//!    per-file title count is a multiple of `max_title_entries_per_file`,
//!    a new index file is opened and its counter restarts.

use serde::Serialize;

use crate::models::CoordinatorState;
use crate::paths::VaultLayout;

/// Capacity limits that drive rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationLimits {
    pub max_files_per_folder: i64,
    pub max_title_entries_per_file: i64,
}

/// Where the next article and its title-index line go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocationResult {
    pub folder_index: i64,
    pub file_index: i64,
    pub folder_path: String,
    pub file_path: String,
    pub need_create_folder: bool,
    pub title_index_file_path: String,
    pub need_create_index_file: bool,
    pub current_title_index_count: i64,
    pub index_of_title_index_files: i64,
}

impl FileLocationResult {
    /// Counters to persist once this allocation is accepted.
    ///
    /// Title counters only move when the article carries a title.
    pub fn advance(&self, prev: &CoordinatorState, with_title: bool) -> CoordinatorState {
        let (title_file, title_count) = if with_title {
            (self.index_of_title_index_files, self.current_title_index_count)
        } else {
            (prev.index_of_title_index_files, prev.current_title_index_count)
        };
        CoordinatorState {
            folder_index_in_vault: self.folder_index,
            file_index_in_folder: self.file_index,
            index_of_title_index_files: title_file,
            current_title_index_count: title_count,
            initialized: true,
        }
    }
}

/// Allocate the next shard location from the previous counters.
pub fn allocate(
    layout: &VaultLayout,
    prev: &CoordinatorState,
    limits: AllocationLimits,
) -> FileLocationResult {
    let max_files = limits.max_files_per_folder.max(1);
    let max_titles = limits.max_title_entries_per_file.max(1);

    let first_ever = prev.file_index_in_folder < 0;
    let (folder_index, file_index, need_create_folder) = if first_ever {
        (prev.folder_index_in_vault.max(0), 0, true)
    } else if prev.file_index_in_folder + 1 >= max_files {
        (prev.folder_index_in_vault + 1, 0, true)
    } else {
        (prev.folder_index_in_vault, prev.file_index_in_folder + 1, false)
    };

    let rotate =
        prev.index_of_title_index_files < 0 || prev.current_title_index_count % max_titles == 0;
    let (index_of_title_index_files, current_title_index_count) = if rotate {
        (prev.index_of_title_index_files.max(-1) + 1, 1)
    } else {
        (
            prev.index_of_title_index_files,
            prev.current_title_index_count + 1,
        )
    };

    FileLocationResult {
        folder_index,
        file_index,
        folder_path: layout.folder_path(folder_index),
        file_path: layout.file_path(folder_index, file_index),
        need_create_folder,
        title_index_file_path: layout.title_index_file_path(index_of_title_index_files),
        need_create_index_file: rotate,
        current_title_index_count,
        index_of_title_index_files,
    }
}
