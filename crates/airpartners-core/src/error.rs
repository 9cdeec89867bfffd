// crates/airpartners-core/src/error.rs

use thiserror::Error;

use crate::types::CacheKey;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{source_name} unavailable after {attempts} attempts: {message}")]
    SourceUnavailable {
        source_name: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("no cached dataset for {0}")]
    CacheMiss(CacheKey),

    #[error("cached dataset {key} is corrupt: {reason}")]
    CorruptCache { key: CacheKey, reason: String },

    #[error("sensor {sensor_id} returned no rows to clean")]
    NoSensorData { sensor_id: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Parsing failed: {0}")]
    Parser(#[from] airpartners_parser::ParserError),

    #[error("Record flattening failed: {0}")]
    Flatten(#[from] crate::flatten::FlattenError),

    #[error("Timestamp normalization failed: {0}")]
    Timestamp(#[from] crate::timestamps::TimestampError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Glob traversal error: {0}")]
    GlobError(#[from] glob::GlobError),

    #[cfg(feature = "runtime")]
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl PipelineError {
    /// True when the error only means "this key was never written".
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, PipelineError::CacheMiss(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
