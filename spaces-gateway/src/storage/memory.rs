/// In-process object store
///
/// Mirrors the listing semantics of S3 (prefix, delimiter, paged results with
/// an opaque continuation token) over a sorted map. Used for local development
/// (`STORAGE_BACKEND=memory`) and throughout the test suite.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{
    ListPage, ListRequest, ObjectMetadata, ObjectStore, ObjectSummary, StorageError,
    MAX_DELETE_BATCH,
};

/// Default page size, matching S3's `max-keys`
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

/// Sorted in-memory object store
pub struct MemoryStore {
    bucket: String,
    page_size: usize,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    list_calls: AtomicUsize,
    delete_batches: AtomicUsize,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::with_page_size(bucket, DEFAULT_PAGE_SIZE)
    }

    /// Store returning at most `page_size` entries per listing page
    pub fn with_page_size(bucket: impl Into<String>, page_size: usize) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: page_size.max(1),
            objects: RwLock::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
            delete_batches: AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Insert an object of `size` zero bytes
    pub async fn insert_sized(&self, key: &str, size: usize) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body: Bytes::from(vec![0u8; size]),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).map(|o| o.body.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// Number of `list_page` calls served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Number of `delete_objects` calls served so far
    pub fn delete_batches(&self) -> usize {
        self.delete_batches.load(Ordering::Relaxed)
    }
}

/// A listing entry before paging: either an object or a grouped prefix
enum Entry {
    Object(ObjectSummary),
    Prefix(String),
}

impl Entry {
    fn sort_key(&self) -> &str {
        match self {
            Entry::Object(object) => &object.key,
            Entry::Prefix(prefix) => prefix,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(&self, request: ListRequest) -> Result<ListPage, StorageError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.read().await;

        // The token is the last key or prefix handed out on the previous page
        let lower = match &request.continuation_token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(request.prefix.clone()),
        };

        let mut seen_prefixes = BTreeSet::new();
        let mut entries = Vec::new();

        for (key, object) in objects.range((lower, Bound::Unbounded)) {
            if !key.starts_with(&request.prefix) {
                break;
            }

            let rest = &key[request.prefix.len()..];
            let grouped = request
                .delimiter
                .as_deref()
                .and_then(|delimiter| rest.find(delimiter).map(|idx| (idx, delimiter.len())));

            let entry = match grouped {
                Some((idx, len)) => {
                    let prefix = format!("{}{}", request.prefix, &rest[..idx + len]);
                    if request.continuation_token.as_deref() >= Some(prefix.as_str())
                        || !seen_prefixes.insert(prefix.clone())
                    {
                        continue;
                    }
                    Entry::Prefix(prefix)
                }
                None => Entry::Object(ObjectSummary {
                    key: key.clone(),
                    size: object.body.len() as u64,
                }),
            };

            entries.push(entry);
            if entries.len() > self.page_size {
                break;
            }
        }

        let truncated = entries.len() > self.page_size;
        entries.truncate(self.page_size);

        let next_continuation_token = if truncated {
            entries.last().map(|entry| entry.sort_key().to_string())
        } else {
            None
        };

        let mut page = ListPage {
            next_continuation_token,
            ..Default::default()
        };
        for entry in entries {
            match entry {
                Entry::Object(object) => page.objects.push(object),
                Entry::Prefix(prefix) => page.common_prefixes.push(prefix),
            }
        }

        Ok(page)
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_objects(&self, keys: Vec<String>) -> Result<(), StorageError> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StorageError::DeleteError(format!(
                "Batch of {} keys exceeds limit of {}",
                keys.len(),
                MAX_DELETE_BATCH
            )));
        }

        self.delete_batches.fetch_add(1, Ordering::Relaxed);
        let mut objects = self.objects.write().await;
        for key in keys {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        Ok(self.objects.read().await.get(key).map(|object| ObjectMetadata {
            key: key.to_string(),
            size: object.body.len() as u64,
            content_type: Some(object.content_type.clone()),
        }))
    }

    async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{}/{}?X-Amz-Expires={}",
            self.bucket,
            key,
            expires_in.as_secs()
        ))
    }
}
