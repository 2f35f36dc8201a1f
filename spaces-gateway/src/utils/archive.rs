/// ZIP archive extraction for uploads
///
/// Entries are extracted in memory. Directory entries are skipped, as are
/// entries whose names would escape the target prefix.

use bytes::Bytes;
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid archive: {0}")]
    Invalid(#[from] zip::result::ZipError),

    #[error("Failed to read archive entry {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive expands beyond {limit} bytes")]
    TooLarge { limit: u64 },
}

/// A regular file taken out of an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Relative path inside the archive, `/` separated
    pub path: String,
    pub data: Bytes,
}

/// Whether an upload should be treated as a ZIP archive
pub fn is_zip_archive(filename: &str, data: &[u8]) -> bool {
    filename.to_lowercase().ends_with(".zip") && data.starts_with(ZIP_MAGIC)
}

/// Extract every non-directory entry, refusing archives that expand past
/// `max_total_bytes`.
pub fn extract_entries(data: &[u8], max_total_bytes: u64) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let path = match file.enclosed_name() {
            Some(path) => path
                .to_path_buf()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            None => {
                warn!(entry = %name, "Skipping archive entry with unsafe path");
                continue;
            }
        };

        total = total.saturating_add(file.size());
        if total > max_total_bytes {
            return Err(ArchiveError::TooLarge {
                limit: max_total_bytes,
            });
        }

        let mut buffer = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buffer)
            .map_err(|source| ArchiveError::Read {
                name: name.clone(),
                source,
            })?;

        debug!(entry = %path, size = buffer.len(), "Extracted archive entry");
        entries.push(ArchiveEntry {
            path,
            data: Bytes::from(buffer),
        });
    }

    Ok(entries)
}


#[cfg(test)]
mod tests {
    use super::fixtures::zip_with;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_skips_directories() {
        let data = zip_with(&[
            ("site/", ""),
            ("site/index.html", "<html></html>"),
            ("site/libs/", ""),
            ("site/libs/app.js", "let a = 1;"),
            ("readme.txt", "hello"),
        ]);

        let entries = extract_entries(&data, u64::MAX).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();

        assert_eq!(paths, vec!["site/index.html", "site/libs/app.js", "readme.txt"]);
        assert_eq!(entries[2].data, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_extract_enforces_size_limit() {
        let block = "0".repeat(64);
        let data = zip_with(&[("a.bin", block.as_str()), ("b.bin", block.as_str())]);
        let err = extract_entries(&data, 100).unwrap_err();
        assert!(matches!(err, ArchiveError::TooLarge { limit: 100 }));
    }

    #[test]
    fn test_invalid_archive() {
        let err = extract_entries(b"PK\x03\x04 not really a zip", u64::MAX).unwrap_err();
        assert!(matches!(err, ArchiveError::Invalid(_)));
    }

    #[test]
    fn test_zip_detection() {
        let data = zip_with(&[("a.txt", "a")]);
        assert!(is_zip_archive("bundle.ZIP", &data));
        assert!(!is_zip_archive("bundle.laz", &data));
        assert!(!is_zip_archive("bundle.zip", b"not a zip"));
    }
}
