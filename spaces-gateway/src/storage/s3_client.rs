/// S3-compatible object storage client
///
/// Talks to AWS S3 or compatible services (DigitalOcean Spaces, MinIO) through
/// the AWS SDK. Spaces is the default target: the endpoint is derived from the
/// region unless one is given explicitly.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{
    ListPage, ListRequest, ObjectMetadata, ObjectStore, ObjectSummary, StorageError,
    MAX_DELETE_BATCH,
};

/// S3 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub path_style: bool,
    /// Apply the `public-read` canned ACL to uploaded objects
    pub public_read: bool,
}

impl S3Config {
    /// Explicit endpoint, or the Spaces endpoint for the configured region
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.digitaloceanspaces.com", self.region),
        }
    }

    fn has_static_credentials(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "nyc3".to_string(),
            bucket: "spaces-gateway".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            path_style: false,
            public_read: true,
        }
    }
}

/// Object store backed by the AWS SDK
pub struct S3Store {
    client: Client,
    bucket: String,
    public_read: bool,
}

impl S3Store {
    /// Create a new S3 store
    pub async fn new(config: S3Config) -> Self {
        let endpoint = config.endpoint_url();
        info!(
            bucket = %config.bucket,
            endpoint = %endpoint,
            "Initializing S3 client"
        );

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if config.has_static_credentials() {
            loader = loader.credentials_provider(Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "spaces-gateway",
            ));
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint)
            .force_path_style(config.path_style)
            .build();

        Self::from_client(Client::from_conf(s3_config), config.bucket, config.public_read)
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, bucket: String, public_read: bool) -> Self {
        Self {
            client,
            bucket,
            public_read,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(&self, request: ListRequest) -> Result<ListPage, StorageError> {
        debug!(
            prefix = %request.prefix,
            delimiter = ?request.delimiter,
            "Listing objects"
        );

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter)
            .set_continuation_token(request.continuation_token)
            .send()
            .await
            .map_err(|e| {
                error!(prefix = %request.prefix, error = %e, "S3 list failed");
                StorageError::ListError(e.to_string())
            })?;

        Ok(list_page_from(response))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        debug!(key = %key, size = body.len(), content_type = %content_type, "Uploading object");

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body));

        if self.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request.send().await.map_err(|e| {
            error!(key = %key, error = %e, "S3 upload failed");
            StorageError::UploadError(e.to_string())
        })?;

        info!(key = %key, "Object uploaded");
        Ok(())
    }

    async fn delete_objects(&self, keys: Vec<String>) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StorageError::DeleteError(format!(
                "Batch of {} keys exceeds limit of {}",
                keys.len(),
                MAX_DELETE_BATCH
            )));
        }

        let identifiers = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| StorageError::DeleteError(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::DeleteError(e.to_string()))?;

        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                error!(count = keys.len(), error = %e, "S3 batch delete failed");
                StorageError::DeleteError(e.to_string())
            })?;

        if let Some(failures) = response.errors {
            if let Some(first) = failures.first() {
                error!(
                    failed = failures.len(),
                    key = ?first.key(),
                    message = ?first.message(),
                    "S3 batch delete reported failures"
                );
                return Err(StorageError::DeleteError(format!(
                    "{} of {} objects could not be deleted",
                    failures.len(),
                    keys.len()
                )));
            }
        }

        info!(count = keys.len(), "Objects deleted");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "S3 delete failed");
                StorageError::DeleteError(e.to_string())
            })?;

        info!(key = %key, "Object deleted");
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMetadata {
                key: key.to_string(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
                content_type: output.content_type().map(|s| s.to_string()),
            })),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(StorageError::Other(service_err.to_string()))
                }
            }
        }
    }

    async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignError(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::PresignError(e.to_string()))?;

        Ok(request.uri().to_string())
    }
}

/// Page of a `ListObjectsV2` response; the token is only kept while truncated
fn list_page_from(response: ListObjectsV2Output) -> ListPage {
    let truncated = response.is_truncated() == Some(true);

    let objects = response
        .contents
        .unwrap_or_default()
        .into_iter()
        .filter_map(|object| {
            let size = object.size().unwrap_or(0).max(0) as u64;
            object.key.map(|key| ObjectSummary { key, size })
        })
        .collect();

    let common_prefixes = response
        .common_prefixes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|prefix| prefix.prefix)
        .collect();

    let next_continuation_token = if truncated {
        response.next_continuation_token
    } else {
        None
    };

    ListPage {
        objects,
        common_prefixes,
        next_continuation_token,
    }
}
