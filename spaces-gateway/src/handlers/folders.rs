use axum::{
    extract::{Path, Query, State},
    Json,
};
use bytes::Bytes;
use futures::future::try_join_all;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    FileResponse, FolderDeletedResponse, FolderListingResponse, ListFolderQuery, MessageResponse,
};
use crate::storage::listing::format_file_size;
use crate::storage::{delete_in_batches, folder_prefix, list_all_keys, ListingResult};
use crate::AppState;

/// List a folder. One level by default, the whole tree with `?recursive=true`.
pub async fn list_folder(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ListFolderQuery>,
) -> ApiResult<Json<FolderListingResponse>> {
    list_prefix(&state, &path, query.recursive).await
}

/// List the bucket root
pub async fn list_root(
    State(state): State<AppState>,
    Query(query): Query<ListFolderQuery>,
) -> ApiResult<Json<FolderListingResponse>> {
    list_prefix(&state, "", query.recursive).await
}

async fn list_prefix(
    state: &AppState,
    path: &str,
    recursive: bool,
) -> ApiResult<Json<FolderListingResponse>> {
    let prefix = folder_prefix(path);
    tracing::info!(prefix = %prefix, recursive, "Listing folder");

    let contents = if recursive {
        state.listing.get_folder_contents(&prefix).await?
    } else {
        state.listing.list_all_contents(&prefix).await?
    };

    let expires_in = Duration::from_secs(state.storage.signed_url_expiry_seconds);
    Ok(Json(listing_response(state, contents, expires_in).await?))
}

async fn listing_response(
    state: &AppState,
    contents: ListingResult,
    expires_in: Duration,
) -> ApiResult<FolderListingResponse> {
    let total_bytes = contents.total_bytes();
    let store = state.store.as_ref();

    let files = try_join_all(contents.files.into_iter().map(|object| async move {
        let signed_url = store.presigned_get_url(&object.key, expires_in).await?;
        Ok::<_, ApiError>(FileResponse {
            size: format_file_size(object.size),
            file: object.key,
            signed_url,
        })
    }))
    .await?;

    Ok(FolderListingResponse {
        files,
        folders: contents.folders,
        total_size: format_file_size(total_bytes),
        total_bytes,
    })
}

/// Create a folder by writing an empty placeholder object `<path>/`
pub async fn create_folder(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let key = folder_prefix(&path);
    if key.is_empty() {
        return Err(ApiError::BadRequest("Folder path is required".to_string()));
    }

    state
        .store
        .put_object(&key, Bytes::new(), mime::APPLICATION_OCTET_STREAM.as_ref())
        .await?;

    tracing::info!(key = %key, "Folder created");
    Ok(Json(MessageResponse::new(format!(
        "Folder \"{}\" created.",
        key.trim_end_matches('/')
    ))))
}

/// Delete every object under `<path>/`, across all listing pages
pub async fn delete_folder(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Json<FolderDeletedResponse>> {
    let prefix = folder_prefix(&path);
    if prefix.is_empty() {
        return Err(ApiError::BadRequest(
            "Refusing to delete the bucket root".to_string(),
        ));
    }

    let keys = list_all_keys(state.store.as_ref(), &prefix).await?;
    if keys.is_empty() {
        return Err(ApiError::NotFound(
            "Folder is empty or does not exist.".to_string(),
        ));
    }

    let deleted = delete_in_batches(state.store.as_ref(), keys).await?;
    tracing::info!(prefix = %prefix, deleted, "Folder deleted");

    Ok(Json(FolderDeletedResponse {
        message: format!(
            "Folder \"{}\" and its contents have been deleted.",
            prefix.trim_end_matches('/')
        ),
        deleted,
    }))
}
