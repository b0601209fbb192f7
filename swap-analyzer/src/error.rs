use thiserror::Error;

/// Errors that can occur while analyzing a request pair or evaluating a template
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// A candidate pair cannot be structurally compared (path-segment count
    /// mismatch, an incomparable header diff, or an encoding mismatch at
    /// evaluation time).
    #[error("diffing out of scope: {0}")]
    DiffingOutOfScope(String),

    /// A single named variable resolved to two distinct values within one
    /// instance, or across two of url/header/query/body.
    #[error("multiple values for variable '{0}'")]
    MultipleValuesForVariable(String),

    /// A `BodyTemplate` was asked to extract from an instance whose body
    /// encoding disagrees with the template's.
    #[error("invalid encoding: expected {expected}, got {actual}")]
    InvalidEncoding { expected: String, actual: String },

    /// Template (de)serialization failed: missing or unknown `type` tag, or
    /// structurally malformed data.
    #[error("invalid template data: {0}")]
    InvalidTemplateData(String),

    /// Body compilation failed for an encoding that should always compile
    /// cleanly; indicates a corrupted template.
    #[error("corrupted template: {0}")]
    CorruptedTemplate(String),

    /// Pattern file or other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Regex compile error surfaced from a pattern file or a built template
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using [`AnalyzerError`]
pub type Result<T> = std::result::Result<T, AnalyzerError>;

impl From<String> for AnalyzerError {
    fn from(s: String) -> Self {
        AnalyzerError::Other(s)
    }
}

impl From<&str> for AnalyzerError {
    fn from(s: &str) -> Self {
        AnalyzerError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for AnalyzerError {
    fn from(err: serde_json::Error) -> Self {
        AnalyzerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalyzerError::MultipleValuesForVariable("user_id".to_string());
        assert_eq!(err.to_string(), "multiple values for variable 'user_id'");
    }

    #[test]
    fn test_error_from_string() {
        let err: AnalyzerError = "boom".into();
        assert!(matches!(err, AnalyzerError::Other(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AnalyzerError = io_err.into();
        assert!(matches!(err, AnalyzerError::Io(_)));
    }
}
