//! Error types for the skopos audit framework

use thiserror::Error;

/// Main error type for skopos operations
#[derive(Debug, Error)]
pub enum SkoposError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid filter pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing resource: {0}")]
    MissingResource(String),

    #[error("Audit error: {0}")]
    AuditError(String),

    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Report error: {0}")]
    ReportError(String),
}

/// Result type alias for skopos operations
pub type Result<T> = std::result::Result<T, SkoposError>;
