use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::storage::{join_key, ObjectStore, StorageError};
use crate::utils::content_type::content_type_for;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to read conversion output {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Upload every file under `output_dir` to `<prefix>/<relative path>`.
///
/// Returns the number of objects written.
pub async fn upload_directory(
    store: &dyn ObjectStore,
    output_dir: &Path,
    prefix: &str,
) -> Result<usize, PublishError> {
    let mut uploaded = 0usize;
    let mut pending = vec![output_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| PublishError::Read {
                path: dir.clone(),
                source,
            })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| PublishError::Read {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|source| PublishError::Read {
                path: path.clone(),
                source,
            })?;

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let relative = relative_key(output_dir, &path);
            let key = join_key(prefix, &relative);
            let body = tokio::fs::read(&path)
                .await
                .map_err(|source| PublishError::Read {
                    path: path.clone(),
                    source,
                })?;

            debug!(key = %key, size = body.len(), "Publishing conversion output");
            store
                .put_object(&key, Bytes::from(body), content_type_for(&relative).as_ref())
                .await?;
            uploaded += 1;
        }
    }

    info!(prefix = %prefix, uploaded, "Conversion output published");
    Ok(uploaded)
}

/// Path of `path` below `root`, with `/` separators
fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
