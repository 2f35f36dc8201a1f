/// Point-cloud conversion through an external converter executable
///
/// A conversion job is built per request from the uploaded artifact and the
/// injected `ConverterSettings`. Jobs run through a bounded `ConversionPool`;
/// each one spawns a single child process and yields exactly one terminal
/// outcome.

pub mod pool;
pub mod publish;
pub mod runner;

pub use pool::ConversionPool;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Conversion queue is full ({capacity} jobs admitted)")]
    QueueFull { capacity: usize },

    #[error("Failed to start conversion process: {0}")]
    Startup(String),

    #[error("Conversion process exited with code {code:?}")]
    Exit { code: Option<i32> },

    #[error("Conversion task ended without reporting an outcome")]
    Aborted,
}

/// Converter settings, injected at startup and shared by every job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterSettings {
    pub executable_path: PathBuf,
    /// Uploaded inputs are staged below this directory
    pub work_dir: PathBuf,
    /// Each job writes into `<output_dir>/<job_id>`
    pub output_dir: PathBuf,
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    /// When set, successful output is copied to the store under this prefix
    pub upload_prefix: Option<String>,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            executable_path: PathBuf::from("PotreeConverter"),
            work_dir: PathBuf::from("./temp/conversions"),
            output_dir: PathBuf::from("./converted"),
            max_concurrent: 2,
            queue_capacity: 8,
            upload_prefix: None,
        }
    }
}

/// Terminal state of one conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Succeeded,
    /// Exited nonzero; `code` is `None` when killed by a signal
    Failed { code: Option<i32> },
    /// The process never started
    StartupError { message: String },
}

impl ConversionOutcome {
    /// Turn a non-successful outcome into an error
    pub fn into_result(self) -> Result<(), ConversionError> {
        match self {
            ConversionOutcome::Succeeded => Ok(()),
            ConversionOutcome::Failed { code } => Err(ConversionError::Exit { code }),
            ConversionOutcome::StartupError { message } => Err(ConversionError::Startup(message)),
        }
    }
}

/// One invocation of the converter
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub page_name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub executable_path: PathBuf,
    pub arguments: Vec<String>,
    /// Directory holding the staged input; removed when the job is dropped
    pub staging: Option<Arc<TempDir>>,
}

impl ConversionJob {
    /// Build the converter invocation for an uploaded input file:
    /// `<exe> <input> -o <output_dir>/<id> --generate-page <page>`
    pub fn new(settings: &ConverterSettings, id: Uuid, input_path: &Path, page_name: &str) -> Self {
        let output_path = settings.output_dir.join(id.to_string());
        let page_name = sanitize_page_name(page_name);

        let arguments = vec![
            input_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
            "--generate-page".to_string(),
            page_name.clone(),
        ];

        Self {
            id,
            page_name,
            input_path: input_path.to_path_buf(),
            output_path,
            executable_path: settings.executable_path.clone(),
            arguments,
            staging: None,
        }
    }

    /// Tie the staged input's directory to this job
    pub fn with_staging(mut self, staging: TempDir) -> Self {
        self.staging = Some(Arc::new(staging));
        self
    }
}

/// Restrict a page name to characters safe in file names and object keys
pub fn sanitize_page_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "pointcloud".to_string()
    } else {
        cleaned
    }
}

/// Page name for an uploaded file: its stem, sanitized
pub fn page_name_for(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    sanitize_page_name(stem)
}
