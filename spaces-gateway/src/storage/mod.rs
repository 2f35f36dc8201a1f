/// Storage module for S3-compatible object stores
///
/// This module provides:
/// - The `ObjectStore` trait every backend implements
/// - An AWS SDK backed client for Spaces / MinIO / S3
/// - An in-process store for local development and tests
/// - The folder listing and aggregation engine

pub mod listing;
pub mod memory;
pub mod s3_client;

pub use listing::{FolderListing, ListingConfig, ListingError, ListingResult};
pub use memory::MemoryStore;
pub use s3_client::{S3Config, S3Store};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Key separator used to emulate folders
pub const DELIMITER: &str = "/";

/// Most keys a single batch delete may carry
pub const MAX_DELETE_BATCH: usize = 1000;

/// Object store error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("List error: {0}")]
    ListError(String),

    #[error("Upload error: {0}")]
    UploadError(String),

    #[error("Delete error: {0}")]
    DeleteError(String),

    #[error("Presign error: {0}")]
    PresignError(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// A single page request against a prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
}

impl ListRequest {
    /// One level below `prefix`, grouped by `/`
    pub fn delimited(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: Some(DELIMITER.to_string()),
            continuation_token: None,
        }
    }

    /// Every key below `prefix`, no grouping
    pub fn flat(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
            continuation_token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// An object returned by a listing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// Set when the store holds more results past this page
    pub next_continuation_token: Option<String>,
}

/// Metadata returned by a head request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Operations the gateway needs from an object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a single page of a listing
    async fn list_page(&self, request: ListRequest) -> Result<ListPage, StorageError>;

    /// Store an object, replacing any existing one with the same key
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Delete up to `MAX_DELETE_BATCH` keys in one call
    async fn delete_objects(&self, keys: Vec<String>) -> Result<(), StorageError>;

    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Returns `None` when the object does not exist
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError>;

    /// Time-limited, read-only download link
    async fn presigned_get_url(&self, key: &str, expires_in: Duration)
        -> Result<String, StorageError>;
}

/// Collect every key under `prefix`, following continuation tokens
pub async fn list_all_keys(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<String>, StorageError> {
    let mut keys = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let page = store
            .list_page(ListRequest::flat(prefix).with_token(continuation_token.take()))
            .await?;

        keys.extend(page.objects.into_iter().map(|object| object.key));

        match page.next_continuation_token {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    Ok(keys)
}

/// Delete every key, splitting into batches the store accepts.
///
/// Returns the number of keys removed.
pub async fn delete_in_batches(
    store: &dyn ObjectStore,
    keys: Vec<String>,
) -> Result<usize, StorageError> {
    let total = keys.len();

    for chunk in keys.chunks(MAX_DELETE_BATCH) {
        store.delete_objects(chunk.to_vec()).await?;
        tracing::debug!(batch = chunk.len(), "Deleted object batch");
    }

    Ok(total)
}

/// Normalise a request path into a folder prefix ending in `/`.
///
/// An empty path maps to the bucket root (empty prefix).
pub fn folder_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}{}", trimmed, DELIMITER)
    }
}

/// Join a folder path and a relative name into an object key
pub fn join_key(folder: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    format!("{}{}", folder_prefix(folder), name)
}
