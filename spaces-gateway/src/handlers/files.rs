use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use bytes::Bytes;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    FileUrlResponse, MessageResponse, UploadQuery, UploadResponse, UploadStatus, UploadedObject,
};
use crate::storage::listing::format_file_size;
use crate::storage::{join_key, ObjectStore};
use crate::utils::archive::{extract_entries, is_zip_archive};
use crate::utils::content_type::content_type_for;
use crate::AppState;

/// A file read from the multipart body
struct UploadedFile {
    filename: String,
    data: Bytes,
}

/// Object key for a request path: no leading or trailing separators
pub fn object_key(path: &str) -> Option<String> {
    let key = path.trim_matches('/');
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Final component of a client-supplied file name
pub fn clean_filename(name: &str) -> Option<String> {
    name.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(str::to_string)
}

/// Signed download URL and size for one object
pub async fn get_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Json<FileUrlResponse>> {
    let key = object_key(&path)
        .ok_or_else(|| ApiError::BadRequest("File path is required".to_string()))?;

    let metadata = state
        .store
        .head_object(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;
    tracing::debug!(key = %metadata.key, size = metadata.size, "Resolved file");

    let url = state
        .store
        .presigned_get_url(
            &key,
            Duration::from_secs(state.storage.signed_url_expiry_seconds),
        )
        .await?;

    Ok(Json(FileUrlResponse {
        url,
        size: format_file_size(metadata.size),
        content_type: metadata.content_type,
    }))
}

/// Upload one or more files below `<path>/`.
///
/// ZIP archives are unpacked entry by entry unless `?extract=false`. Each
/// object gets its own status; the request only fails outright when nothing
/// could be stored.
pub async fn upload_files(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    tracing::info!(path = %path, extract = query.extract, "Received upload request");

    let max_files = state.storage.max_upload_files;
    let mut uploads: Vec<UploadedFile> = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().and_then(clean_filename) else {
            tracing::debug!(field = ?field.name(), "Skipping non-file field");
            continue;
        };

        if uploads.len() == max_files {
            return Err(ApiError::BadRequest(format!(
                "Too many files. At most {} files per request",
                max_files
            )));
        }

        let data = field.bytes().await?;
        if data.is_empty() {
            return Err(ApiError::BadRequest(format!("Empty file provided: {}", filename)));
        }

        tracing::debug!(filename = %filename, size = data.len(), "File received");
        uploads.push(UploadedFile { filename, data });
    }

    if uploads.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded.".to_string()));
    }

    let store = state.store.as_ref();
    let mut results = Vec::new();

    for upload in uploads {
        if query.extract && is_zip_archive(&upload.filename, &upload.data) {
            let entries = extract_entries(&upload.data, state.storage.max_archive_bytes())?;
            tracing::info!(
                archive = %upload.filename,
                entries = entries.len(),
                "Extracting archive"
            );

            for entry in entries {
                let key = join_key(&path, &entry.path);
                let stored =
                    store_object(store, key, &entry.path, entry.data, UploadStatus::Extracted).await;
                results.push(stored);
            }
        } else {
            let key = join_key(&path, &upload.filename);
            let stored =
                store_object(store, key, &upload.filename, upload.data, UploadStatus::Uploaded)
                    .await;
            results.push(stored);
        }
    }

    let failed = results.iter().filter(|r| r.status == UploadStatus::Failed).count();
    let uploaded = results.len() - failed;

    if uploaded == 0 && failed > 0 {
        return Err(ApiError::Internal("Failed to upload file.".to_string()));
    }

    tracing::info!(path = %path, uploaded, failed, "Upload finished");

    Ok(Json(UploadResponse {
        message: format!("{} file(s) uploaded to \"{}\".", uploaded, path.trim_matches('/')),
        uploaded,
        failed,
        files: results,
    }))
}

async fn store_object(
    store: &dyn ObjectStore,
    key: String,
    name: &str,
    data: Bytes,
    status: UploadStatus,
) -> UploadedObject {
    let content_type = content_type_for(name).to_string();
    let size = data.len();

    match store.put_object(&key, data, &content_type).await {
        Ok(()) => UploadedObject {
            key,
            content_type,
            size,
            status,
            error: None,
        },
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Failed to upload object");
            UploadedObject {
                key,
                content_type,
                size,
                status: UploadStatus::Failed,
                error: Some("Failed to upload file.".to_string()),
            }
        }
    }
}

/// Delete a single object
pub async fn delete_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let key = object_key(&path)
        .ok_or_else(|| ApiError::BadRequest("File path is required".to_string()))?;

    state.store.delete_object(&key).await?;
    tracing::info!(key = %key, "File deleted");

    Ok(Json(MessageResponse::new(format!(
        "File \"{}\" deleted successfully.",
        key
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("/scans/a.laz/").as_deref(), Some("scans/a.laz"));
        assert_eq!(object_key("//"), None);
    }

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("cloud.laz").as_deref(), Some("cloud.laz"));
        assert_eq!(clean_filename("C:\\scans\\cloud.laz").as_deref(), Some("cloud.laz"));
        assert_eq!(clean_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(clean_filename("dir/"), None);
        assert_eq!(clean_filename(".."), None);
    }
}
