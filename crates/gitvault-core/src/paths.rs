//! Repository path normalization and the vault's synthetic layout.
//!
//! ```text
//! {vault_path}/{vault_name}/
//!     Folder_0/.gitkeep
//!     Folder_0/Article_0.md
//!     Folder_0/Article_1.md
//!     ...
//!     TitleIndex/TitleIndex_0.jsonl
//! ```

use crate::error::{VaultError, VaultResult};

/// Marker file that materializes a folder in the remote store.
pub const FOLDER_MARKER: &str = ".gitkeep";

/// Normalize a repository path.
///
/// Backslashes are rejected, duplicate slashes collapse, and leading or
/// trailing slashes are dropped. `.` and `..` segments are rejected.
pub fn normalize_path(path: &str) -> VaultResult<String> {
    if path.contains('\\') {
        return Err(VaultError::Validation(format!(
            "path must use '/' separators: {path}"
        )));
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" => continue,
            "." | ".." => {
                return Err(VaultError::Validation(format!(
                    "relative segments are not allowed: {path}"
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Join path pieces and normalize the result.
pub fn join_path(parts: &[&str]) -> VaultResult<String> {
    normalize_path(&parts.join("/"))
}

/// Validated root of one vault inside the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    root: String,
}

impl VaultLayout {
    pub fn new(vault_path: &str, vault_name: &str) -> VaultResult<Self> {
        let name = normalize_path(vault_name)?;
        if name.is_empty() {
            return Err(VaultError::Validation(
                "vault name must not be empty".to_string(),
            ));
        }
        let root = join_path(&[vault_path, &name])?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn folder_path(&self, folder_index: i64) -> String {
        format!("{}/Folder_{}", self.root, folder_index)
    }

    pub fn folder_marker_path(&self, folder_index: i64) -> String {
        format!("{}/{}", self.folder_path(folder_index), FOLDER_MARKER)
    }

    pub fn file_path(&self, folder_index: i64, file_index: i64) -> String {
        format!("{}/Article_{}.md", self.folder_path(folder_index), file_index)
    }

    pub fn title_index_file_path(&self, index: i64) -> String {
        format!("{}/TitleIndex/TitleIndex_{}.jsonl", self.root, index)
    }
}
