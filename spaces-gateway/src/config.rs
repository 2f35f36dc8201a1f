/// Configuration module for the Spaces Gateway
///
/// Every section loads from environment variables (a `.env` file is honoured),
/// falls back to defaults, and validates before the server starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::observability::{LogFormat, LogLevel};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::conversion::ConverterSettings;
use crate::storage::{ListingConfig, S3Config};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub listing: ListingConfig,
    pub converter: ConverterSettings,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            listing: listing_from_env()?,
            converter: converter_from_env()?,
            logging: LoggingConfig::from_env(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.storage.validate()?;

        if self.listing.max_depth == 0 {
            anyhow::bail!("Listing max depth must be at least 1");
        }
        if self.listing.max_prefixes == 0 {
            anyhow::bail!("Listing prefix budget must be at least 1");
        }
        if self.converter.max_concurrent == 0 {
            anyhow::bail!("Converter concurrency must be at least 1");
        }
        if self.converter.executable_path.as_os_str().is_empty() {
            anyhow::bail!("Converter executable path cannot be empty");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            listing: ListingConfig::default(),
            converter: ConverterSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size_mb: u64,
    pub cors_allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
            max_request_size_mb: parse_var("MAX_REQUEST_SIZE_MB", defaults.max_request_size_mb)?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.max_request_size_mb == 0 {
            anyhow::bail!("Max request size must be greater than 0");
        }
        Ok(())
    }

    pub fn max_request_bytes(&self) -> usize {
        (self.max_request_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            max_request_size_mb: 100,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Which object store implementation backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "s3" | "spaces" => Ok(StorageBackend::S3),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown storage backend '{}'", other),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3: S3Config,
    pub signed_url_expiry_seconds: u64,
    pub max_upload_files: usize,
    pub max_archive_size_mb: u64,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse().context("Invalid STORAGE_BACKEND")?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            s3: S3Config {
                endpoint: optional_var("S3_ENDPOINT"),
                region: env::var("DO_SPACE_REGION").unwrap_or(defaults.s3.region),
                bucket: env::var("DO_SPACE_NAME").unwrap_or(defaults.s3.bucket),
                access_key_id: env::var("DO_SPACE_KEY").unwrap_or_default(),
                secret_access_key: env::var("DO_SPACE_SECRET").unwrap_or_default(),
                path_style: parse_var("S3_PATH_STYLE", defaults.s3.path_style)?,
                public_read: parse_var("PUBLIC_READ", defaults.s3.public_read)?,
            },
            signed_url_expiry_seconds: parse_var(
                "SIGNED_URL_EXPIRY_SECONDS",
                defaults.signed_url_expiry_seconds,
            )?,
            max_upload_files: parse_var("MAX_UPLOAD_FILES", defaults.max_upload_files)?,
            max_archive_size_mb: parse_var("MAX_ARCHIVE_SIZE_MB", defaults.max_archive_size_mb)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.s3.bucket.is_empty() {
            anyhow::bail!("Bucket name cannot be empty");
        }
        if self.backend == StorageBackend::S3 && self.s3.region.is_empty() {
            anyhow::bail!("Region cannot be empty");
        }
        if self.signed_url_expiry_seconds == 0 {
            anyhow::bail!("Signed URL expiry must be greater than 0");
        }
        if self.max_upload_files == 0 {
            anyhow::bail!("Max upload files must be at least 1");
        }
        Ok(())
    }

    pub fn max_archive_bytes(&self) -> u64 {
        self.max_archive_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            s3: S3Config::default(),
            signed_url_expiry_seconds: 300,
            max_upload_files: 10,
            max_archive_size_mb: 1024,
        }
    }
}

fn listing_from_env() -> Result<ListingConfig> {
    let defaults = ListingConfig::default();
    Ok(ListingConfig {
        max_depth: parse_var("LISTING_MAX_DEPTH", defaults.max_depth)?,
        max_prefixes: parse_var("LISTING_MAX_PREFIXES", defaults.max_prefixes)?,
    })
}

fn converter_from_env() -> Result<ConverterSettings> {
    let defaults = ConverterSettings::default();
    Ok(ConverterSettings {
        executable_path: optional_var("CONVERTER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.executable_path),
        work_dir: optional_var("CONVERTER_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir),
        output_dir: optional_var("CONVERTER_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir),
        max_concurrent: parse_var("CONVERTER_MAX_CONCURRENT", defaults.max_concurrent)?,
        queue_capacity: parse_var("CONVERTER_QUEUE_CAPACITY", defaults.queue_capacity)?,
        upload_prefix: optional_var("CONVERTER_UPLOAD_PREFIX"),
    })
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
            .unwrap_or(LogLevel::Info);
        let format = env::var("LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or(LogFormat::Pretty);

        Self { level, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
        }
    }
}
