//! Error types for crossing analytics
//!
//! - `AnalyticsError` is what query operations return to callers
//! - `SourceError` is a failed read from an event source
//! - `RecordError` is what an event stream yields per record; malformed records are
//!   skipped and counted, source errors abort the query
//! - `SketchError` covers quantile sketch misuse

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for query operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Parameters rejected before any processing started
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The event source could not be read; no partial result is returned
    #[error("source '{source_name}' unavailable: {cause}")]
    SourceUnavailable {
        source_name: String,
        #[source]
        cause: SourceError,
    },
}

impl AnalyticsError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        AnalyticsError::InvalidParameters(msg.into())
    }

    pub fn unavailable(source_name: &str, cause: SourceError) -> Self {
        AnalyticsError::SourceUnavailable { source_name: source_name.to_string(), cause }
    }

    /// Stable short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::InvalidParameters(_) => "invalid_parameters",
            AnalyticsError::SourceUnavailable { .. } => "source_unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source path {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {cause}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        SourceError::Io { path: path.into(), cause }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl RecordError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        RecordError::Malformed(reason.into())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SketchError {
    #[error("invalid sketch parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("incompatible sketches: {0}")]
    Incompatible(&'static str),
}

impl From<SketchError> for AnalyticsError {
    fn from(e: SketchError) -> Self {
        AnalyticsError::InvalidParameters(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(AnalyticsError::invalid("x").kind(), "invalid_parameters");
        let err = AnalyticsError::unavailable(
            "table",
            SourceError::NotFound(PathBuf::from("/missing")),
        );
        assert_eq!(err.kind(), "source_unavailable");
        assert!(err.to_string().contains("table"));
        assert!(err.to_string().contains("/missing"));
    }

    #[test]
    fn test_sketch_error_converts_to_invalid_parameters() {
        let err: AnalyticsError = SketchError::InvalidParameter("k too small").into();
        assert!(matches!(err, AnalyticsError::InvalidParameters(_)));
    }
}
