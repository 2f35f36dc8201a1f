//! Structured logging setup for the gateway

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{ObservabilityError, ObservabilityResult};

/// Crates whose debug output drowns the gateway's own events
const NOISY_TARGETS: &[&str] = &["aws_config", "aws_smithy_runtime", "hyper", "h2"];

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format for log aggregation
    Json,
    /// Compact format
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub service_name: String,
    pub include_line_numbers: bool,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            service_name: "spaces-gateway".to_string(),
            include_line_numbers: true,
            include_thread_ids: false,
        }
    }
}

/// Filter directives used when `RUST_LOG` is not set.
///
/// Dependency chatter is capped at `warn` unless the gateway itself is
/// tracing.
pub fn default_directives(level: LogLevel) -> String {
    let mut directives = vec![level.as_str().to_string()];
    if level != LogLevel::Trace {
        directives.extend(NOISY_TARGETS.iter().map(|target| format!("{}=warn", target)));
    }
    directives.join(",")
}

/// Initialize logging for the service
pub fn init_logging(config: LogConfig) -> ObservabilityResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(config.level)))
        .map_err(|e| ObservabilityError::Logging(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(config.include_thread_ids)
                    .with_line_number(config.include_line_numbers)
                    .pretty(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_thread_ids(config.include_thread_ids)
                    .with_line_number(config.include_line_numbers),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_thread_ids(config.include_thread_ids),
            )
            .try_init(),
    };
    result.map_err(|e| ObservabilityError::Logging(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        level = %config.level.as_str(),
        "Logging initialized"
    );

    Ok(())
}
