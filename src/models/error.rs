//! Error types for powersample.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (missing template, invalid input)
//! - I^B materialized: Backend failures (network, timeout, provider status)
//! - K_i violated: Internal invariant violations (bugs)
//!
//! Parse degradations (judge label, score, rationale) and language detection
//! failures are deliberately absent: they resolve to defaults where they occur
//! and never surface as an error value.

use thiserror::Error;

/// Top-level error type for powersample.
#[derive(Debug, Error)]
pub enum SamplerError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED: Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Prompt template not found: {0}")]
    TemplateMissing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED: Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED: Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Model backend specific errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limited by backend: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl SamplerError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Backend(BackendError::RateLimited { .. }) => true,
            Self::Backend(BackendError::ApiError { status, .. }) => *status >= 500,
            _ => false,
        }
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::Backend(BackendError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }

    /// Whether this error came from talking to the model backend.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Network(_) | Self::Timeout(_) | Self::ParseError(_)
        )
    }
}

/// Result type alias for powersample.
pub type Result<T> = std::result::Result<T, SamplerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(SamplerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            SamplerError::Backend(BackendError::ApiError {
                status: 503,
                message: "overloaded".into()
            })
            .is_retryable()
        );
        assert!(
            !SamplerError::Backend(BackendError::ApiError {
                status: 400,
                message: "bad request".into()
            })
            .is_retryable()
        );
        assert!(!SamplerError::Backend(BackendError::AuthenticationFailed).is_retryable());
        assert!(!SamplerError::TemplateMissing("judge".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = SamplerError::Backend(BackendError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: Some(2.5),
        });
        assert_eq!(err.retry_after(), Some(2.5));
        assert_eq!(SamplerError::Internal("x".into()).retry_after(), None);
    }

    #[test]
    fn test_backend_failure_classification() {
        assert!(SamplerError::ParseError("bad json".into()).is_backend_failure());
        assert!(!SamplerError::TemplateMissing("mark".into()).is_backend_failure());
        assert!(!SamplerError::InvalidInput("empty".into()).is_backend_failure());
    }
}
