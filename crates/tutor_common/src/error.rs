//! Typed error taxonomy for the deck service.
//!
//! Components report failures with `anyhow` internally; the orchestrator
//! is the single boundary that converts them into `TutorError` kinds for
//! the HTTP envelope. A cache miss is never an error.

use serde::Serialize;
use thiserror::Error;

/// Service-level error kinds surfaced in the error envelope.
#[derive(Debug, Error)]
pub enum TutorError {
    /// Request failed validation or a required field is missing.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A deck id or card name did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// LLM, embedding or catalog backend I/O failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// LLM returned malformed structured output after the retry.
    #[error("structured output parse failure: {0}")]
    ParseFailure(String),

    /// A deck could not be brought to target size or legality.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A phase exceeded its soft budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Any other uncaught condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TutorError {
    /// Stable kind string used in the JSON error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            TutorError::InvalidInput(_) => "invalid_input",
            TutorError::NotFound(_) => "not_found",
            TutorError::UpstreamUnavailable(_) => "upstream_unavailable",
            TutorError::ParseFailure(_) => "parse_failure",
            TutorError::InvariantViolation(_) => "invariant_violation",
            TutorError::Timeout(_) => "timeout",
            TutorError::Internal(_) => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TutorError::UpstreamUnavailable(_) | TutorError::Timeout(_)
        )
    }
}

/// Error envelope body for controlled failures.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &TutorError) -> Self {
        Self {
            success: false,
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
