use axum::{
    extract::{Multipart, State},
    Json,
};
use bytes::Bytes;
use uuid::Uuid;

use crate::conversion::publish::upload_directory;
use crate::conversion::{page_name_for, sanitize_page_name, ConversionJob};
use crate::error::{ApiError, ApiResult};
use crate::handlers::files::clean_filename;
use crate::models::ConvertResponse;
use crate::storage::join_key;
use crate::AppState;

/// Convert an uploaded point cloud with the external converter.
///
/// Multipart fields: `file` (required) and `pageName` (optional, defaults to
/// the file stem). The request waits for the converter to exit.
pub async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ConvertResponse>> {
    tracing::info!("Received request to convert point cloud");

    let mut input: Option<(String, Bytes)> = None;
    let mut page_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .and_then(clean_filename)
                    .ok_or_else(|| {
                        ApiError::BadRequest("Uploaded file has no name".to_string())
                    })?;
                let data = field.bytes().await?;
                if data.is_empty() {
                    return Err(ApiError::BadRequest("Empty file provided".to_string()));
                }
                input = Some((filename, data));
            }
            Some("pageName") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    page_name = Some(sanitize_page_name(&value));
                }
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown field");
            }
        }
    }

    let (filename, data) =
        input.ok_or_else(|| ApiError::BadRequest("No file uploaded.".to_string()))?;
    let page_name = page_name.unwrap_or_else(|| page_name_for(&filename));

    let settings = state.converter.as_ref();
    let job_id = Uuid::new_v4();

    tokio::fs::create_dir_all(&settings.work_dir).await?;
    tokio::fs::create_dir_all(&settings.output_dir).await?;

    // Owned by the job, so it outlives this request if the client goes away
    let staging = tempfile::Builder::new()
        .prefix(&format!("{}-", job_id))
        .tempdir_in(&settings.work_dir)?;
    let input_path = staging.path().join(&filename);
    tokio::fs::write(&input_path, &data).await?;

    let job = ConversionJob::new(settings, job_id, &input_path, &page_name).with_staging(staging);
    let output_path = job.output_path.clone();
    tracing::info!(
        job_id = %job_id,
        filename = %filename,
        size = data.len(),
        page_name = %job.page_name,
        "Conversion job staged"
    );

    let outcome = state.pool.submit(job).await?;
    outcome.clone().into_result()?;

    // Without an upload prefix the local output is the result and stays on disk
    let (published_prefix, published_objects) = match &settings.upload_prefix {
        Some(prefix) => {
            let prefix = join_key(prefix, &page_name);
            let count = upload_directory(state.store.as_ref(), &output_path, &prefix).await?;
            if let Err(e) = tokio::fs::remove_dir_all(&output_path).await {
                tracing::warn!(
                    job_id = %job_id,
                    path = %output_path.display(),
                    error = %e,
                    "Failed to remove published conversion output"
                );
            }
            (Some(prefix), Some(count))
        }
        None => (None, None),
    };

    Ok(Json(ConvertResponse {
        message: "Conversion completed successfully.".to_string(),
        job_id,
        page_name,
        outcome,
        published_prefix,
        published_objects,
    }))
}
