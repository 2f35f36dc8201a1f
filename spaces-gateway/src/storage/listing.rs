/// Folder listing and aggregation
///
/// Folders are prefixes. A single level is read with a delimited, paged
/// listing; a whole tree is expanded with an explicit work queue bounded by a
/// depth budget and a prefix budget, so self-referential or very deep prefix
/// structures cannot cause unbounded request storms.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::{ListRequest, ObjectStore, ObjectSummary, StorageError, DELIMITER};

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

#[derive(Debug, Error)]
pub enum ListingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Folder {prefix} is nested deeper than {max_depth} levels")]
    DepthExceeded { prefix: String, max_depth: usize },

    #[error("Folder tree has more than {max_prefixes} folders")]
    PrefixBudgetExceeded { max_prefixes: usize },
}

/// Limits applied while expanding a folder tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    pub max_depth: usize,
    pub max_prefixes: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_prefixes: 10_000,
        }
    }
}

/// Files and sub-prefixes gathered under a prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingResult {
    pub files: Vec<ObjectSummary>,
    pub folders: Vec<String>,
}

impl ListingResult {
    pub fn total_bytes(&self) -> u64 {
        total_size(&self.files)
    }
}

/// Listing engine over an object store
pub struct FolderListing {
    store: Arc<dyn ObjectStore>,
    config: ListingConfig,
}

impl FolderListing {
    pub fn new(store: Arc<dyn ObjectStore>, config: ListingConfig) -> Self {
        Self { store, config }
    }

    /// List exactly one level under `prefix`, across every page.
    ///
    /// Placeholder objects (keys ending in `/`) are folders, not files, and are
    /// left out of `files`.
    pub async fn list_all_contents(&self, prefix: &str) -> Result<ListingResult, StorageError> {
        let mut result = ListingResult::default();
        let mut seen_files = HashSet::new();
        let mut seen_folders = HashSet::new();
        let mut continuation_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .store
                .list_page(ListRequest::delimited(prefix).with_token(continuation_token.take()))
                .await?;
            pages += 1;

            for object in page.objects {
                if object.key.ends_with(DELIMITER) {
                    continue;
                }
                if seen_files.insert(object.key.clone()) {
                    result.files.push(object);
                }
            }

            for folder in page.common_prefixes {
                if seen_folders.insert(folder.clone()) {
                    result.folders.push(folder);
                }
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        debug!(
            prefix = %prefix,
            pages,
            files = result.files.len(),
            folders = result.folders.len(),
            "Listed folder level"
        );

        Ok(result)
    }

    /// Expand `prefix` and every folder below it.
    ///
    /// Every file at every depth appears exactly once. A listing failure at any
    /// level aborts the whole aggregation and nothing partial is returned.
    pub async fn get_folder_contents(&self, prefix: &str) -> Result<ListingResult, ListingError> {
        let mut result = ListingResult::default();
        let mut seen_files = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<(String, usize)> = VecDeque::new();

        visited.insert(prefix.to_string());
        pending.push_back((prefix.to_string(), 0));

        while let Some((current, depth)) = pending.pop_front() {
            let level = self.list_all_contents(&current).await?;

            for file in level.files {
                if seen_files.insert(file.key.clone()) {
                    result.files.push(file);
                }
            }

            for folder in level.folders {
                if !visited.insert(folder.clone()) {
                    warn!(prefix = %folder, "Skipping folder already expanded");
                    continue;
                }
                if depth + 1 > self.config.max_depth {
                    return Err(ListingError::DepthExceeded {
                        prefix: folder,
                        max_depth: self.config.max_depth,
                    });
                }
                if result.folders.len() >= self.config.max_prefixes {
                    return Err(ListingError::PrefixBudgetExceeded {
                        max_prefixes: self.config.max_prefixes,
                    });
                }

                result.folders.push(folder.clone());
                pending.push_back((folder, depth + 1));
            }
        }

        debug!(
            prefix = %prefix,
            files = result.files.len(),
            folders = result.folders.len(),
            "Aggregated folder tree"
        );

        Ok(result)
    }
}

/// Sum of object sizes in bytes
pub fn total_size(files: &[ObjectSummary]) -> u64 {
    files.iter().map(|file| file.size).sum()
}

/// Render a byte count with base-1024 units, e.g. `1536` as `"1.5 KB"`
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let exponent = (bytes.ilog(1024) as usize).min(SIZE_UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;

    format!("{} {}", rounded, SIZE_UNITS[exponent])
}
