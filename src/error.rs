//! Error taxonomy for the matching pipeline.

use thiserror::Error;

/// Raised while validating template/override configuration payloads.
///
/// Surfaced at validation time, never from inside a run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConfigurationError(pub String);

impl ConfigurationError {
    pub fn new(context: &str, message: impl std::fmt::Display) -> Self {
        Self(format!("{context} {message}"))
    }
}

/// Raised when no criteria remain after normalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PlanningError(pub String);

/// Raised at runner entry when a required provider is missing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderConfigurationError(pub String);

/// The single error type that crosses the runner boundary.
///
/// Domain errors raised anywhere inside the pipeline are caught at the
/// runner and converted into one of these variants; only `Transient`
/// triggers task-level retry.
#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("provider configuration error: {0}")]
    ProviderConfiguration(#[from] ProviderConfigurationError),

    /// Network/timeout/rate-limit failure from the vector searcher or LLM.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Database write failure during audit or match persistence.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The job was cancelled externally; never retried.
    #[error("job cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl MatchingError {
    /// Whether this error should be retried by the job runner.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchingError::Transient(_))
    }

    /// Truncate to the 1000-character bound the audit recorder stores.
    pub fn truncated_message(&self) -> String {
        let message = self.to_string();
        if message.len() <= 1000 {
            message
        } else {
            message.chars().take(1000).collect()
        }
    }
}
