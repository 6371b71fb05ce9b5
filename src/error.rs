//! Error taxonomy shared by every analytical component.
//!
//! Only [`AnalysisError::DataFormat`] is allowed to abort an operation, and
//! only for the source involved. Provider and budget failures are converted
//! into degraded answers by the component that observes them; the orchestrator
//! turns anything left over into an error-marked answer string.

use thiserror::Error;

/// Result alias used by the core components.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Failures surfaced by the core.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Unreadable or malformed source. Fatal to the current request, never retried.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// Generation or embedding provider unreachable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Iteration or wall-clock budget exhausted.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Referenced dataset or index is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// File extension outside the analyzable set.
    #[error("unsupported file type '{0}'. Allowed: csv, xlsx, xls, pdf, txt, epub")]
    UnsupportedExtension(String),

    /// Filesystem failure that is not a format problem.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::DataFormat(_) => "data_format",
            AnalysisError::ProviderUnavailable(_) => "provider_unavailable",
            AnalysisError::BudgetExceeded(_) => "budget_exceeded",
            AnalysisError::NotFound(_) => "not_found",
            AnalysisError::UnsupportedExtension(_) => "unsupported_extension",
            AnalysisError::Io(_) => "io",
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        AnalysisError::DataFormat(msg.into())
    }
}

impl From<ProviderError> for AnalysisError {
    fn from(err: ProviderError) -> Self {
        AnalysisError::ProviderUnavailable(err.to_string())
    }
}

/// Failure of an embedding or generation call.
///
/// Every provider method returns this, so callers are forced to pick a
/// fallback instead of letting a transport error escape.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider is switched off in configuration.
    #[error("provider '{0}' is disabled")]
    Disabled(String),

    /// Network failure, timeout, or retries exhausted.
    #[error("{provider} unreachable: {message}")]
    Unreachable { provider: String, message: String },

    /// Provider answered with something we cannot use.
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    pub(crate) fn unreachable(provider: &str, message: impl ToString) -> Self {
        ProviderError::Unreachable {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid(provider: &str, message: impl ToString) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }
}
