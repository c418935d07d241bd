//! Unified error types for the query compiler.
//!
//! One enum covers every failure surfaced by the pipeline: validation,
//! security-context evaluation, join resolution, dialect capability gaps,
//! and executor failures. Errors never carry bound parameter values,
//! only templated SQL text and messages.

use thiserror::Error;

/// Result type for compiler operations.
pub type CompilerResult<T> = Result<T, CompilerError>;

/// Unified error type for the query compiler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompilerError {
    /// The query failed semantic validation. Carries every collected error.
    #[error("invalid query: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The security context was missing/empty, or a cube's base query
    /// rejected it.
    #[error("security context error: {0}")]
    SecurityContext(String),

    /// No join path exists from the primary cube to a required cube.
    #[error("no join path from '{from}' to '{to}'")]
    JoinResolution { from: String, to: String },

    /// A requested feature is not available on the target dialect.
    #[error("'{feature}' is not supported by the {dialect} dialect")]
    UnsupportedFeature { feature: String, dialect: String },

    /// The executor raised. Carries the templated SQL (placeholders, not
    /// values) for diagnosis.
    #[error("database execution failed: {message}")]
    DatabaseExecution { message: String, sql: String },

    /// Planning failed for a reason not covered by the other variants.
    #[error("query planning error: {0}")]
    Plan(String),
}

impl CompilerError {
    pub fn plan(msg: impl Into<String>) -> Self {
        CompilerError::Plan(msg.into())
    }

    /// Stable wire code for the adapter layer.
    pub fn code(&self) -> &'static str {
        match self {
            CompilerError::Validation(_) => "VALIDATION_ERROR",
            CompilerError::SecurityContext(_) => "SECURITY_CONTEXT_ERROR",
            CompilerError::JoinResolution { .. } => "JOIN_RESOLUTION_ERROR",
            CompilerError::UnsupportedFeature { .. } => "UNSUPPORTED_FEATURE_ERROR",
            CompilerError::DatabaseExecution { .. } => "DATABASE_EXECUTION_ERROR",
            CompilerError::Plan(_) => "VALIDATION_ERROR",
        }
    }

    /// HTTP-ish status for the adapter layer.
    pub fn status_code(&self) -> u16 {
        match self {
            CompilerError::SecurityContext(_) => 403,
            CompilerError::DatabaseExecution { .. } => 500,
            _ => 400,
        }
    }

    /// Wire representation: `{error, code, statusCode}`.
    pub fn to_wire(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            code: self.code().into(),
            status_code: self.status_code(),
        }
    }
}

/// Error wire format.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub status_code: u16,
}
