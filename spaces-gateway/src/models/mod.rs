use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversion::ConversionOutcome;

/// A file inside a listed folder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub file: String,
    /// Human-readable, e.g. "1.5 KB"
    pub size: String,
    pub signed_url: String,
}

/// Response for `GET /folders/*path`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListingResponse {
    pub files: Vec<FileResponse>,
    pub folders: Vec<String>,
    pub total_size: String,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFolderQuery {
    /// Aggregate the whole tree instead of one level
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadQuery {
    /// Unpack `.zip` uploads into their entries
    #[serde(default = "default_extract")]
    pub extract: bool,
}

fn default_extract() -> bool {
    true
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response for `DELETE /folders/*path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderDeletedResponse {
    pub message: String,
    pub deleted: usize,
}

/// Response for `GET /files/*path`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUrlResponse {
    pub url: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploaded,
    Extracted,
    Failed,
}

/// Outcome for one uploaded file or archive entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub key: String,
    pub content_type: String,
    pub size: usize,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `POST /files/*path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub uploaded: usize,
    pub failed: usize,
    pub files: Vec<UploadedObject>,
}

/// Response for `POST /convert`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub message: String,
    pub job_id: Uuid,
    pub page_name: String,
    pub outcome: ConversionOutcome,
    /// Object prefix the generated page was published under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_objects: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub running_conversions: usize,
    pub max_concurrent_conversions: usize,
    pub conversion_queue_capacity: usize,
    /// Conversions that can still be admitted before requests are rejected
    pub conversion_capacity: usize,
}
