//! Error types for the ETL pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the ETL pipeline
///
/// `Config` and `Load` are fatal for a run; `Extraction` and
/// `SchemaConflict` are recovered at the per-source boundary.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction failed for source '{source_name}': {cause}")]
    Extraction { source_name: String, cause: String },

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EtlError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an extraction error attributed to a named source
    pub fn extraction(source: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Extraction {
            source_name: source.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a load error wrapping the underlying storage failure
    pub fn load(cause: impl std::fmt::Display) -> Self {
        Self::Load(cause.to_string())
    }

    /// Create a parse error for structurally invalid input
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}
