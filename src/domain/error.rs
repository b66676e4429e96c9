use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppError {
    /// A slot phrase could not be mapped to any column of the active dataset.
    UnresolvableColumn(String),
    /// A literal could not be coerced to the kind of the column it is compared with.
    TypeMismatch(String),
    /// Malformed structured operation, including undecodable model output.
    InvalidOperation(String),
    /// The operation references a dataset (or column) that is no longer current.
    StaleOperation(String),
    /// The fallback parser exceeded its time bound.
    ParseTimeout(u64),
    Internal(String),
    NotFound(String),
    ValidationError(String),
    ParseError(String),
    LLMError(String),
    SecurityError(String),
    IoError(String),
}

impl AppError {
    /// Errors that degrade to suggestions instead of failing the query.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::UnresolvableColumn(_)
                | AppError::TypeMismatch(_)
                | AppError::InvalidOperation(_)
                | AppError::StaleOperation(_)
                | AppError::ParseTimeout(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UnresolvableColumn(phrase) => {
                write!(f, "No column matches '{}' in the current dataset", phrase)
            }
            AppError::TypeMismatch(msg) => write!(f, "Type mismatch: {}", msg),
            AppError::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            AppError::StaleOperation(msg) => write!(f, "Stale operation: {}", msg),
            AppError::ParseTimeout(ms) => {
                write!(f, "Semantic parser timed out after {}ms", ms)
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::LLMError(msg) => write!(f, "LLM error: {}", msg),
            AppError::SecurityError(msg) => write!(f, "Security error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
