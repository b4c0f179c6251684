//! Error types.
//!
//! Only [`ContextError::NotFound`] for a primary target ever escapes
//! [`ContextAssemblyService::build`](crate::ContextAssemblyService::build).
//! Everything else is recoverable and ends up as an outcome tag on the payload.

/// Errors surfaced by context building.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact {reference} is unreadable: {reason}")]
    Unreadable { reference: String, reason: String },

    #[error("documentation fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    #[error("summarization failed: {0}")]
    SummarizationFailed(#[from] SummarizeError),

    #[error("no configuration for consumer {0:?}")]
    ConfigurationMissing(String),
}

impl From<ArtifactError> for ContextError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(reference) => ContextError::NotFound(reference),
            ArtifactError::Io { reference, source } => ContextError::Unreadable {
                reference,
                reason: source.to_string(),
            },
        }
    }
}

/// Errors from an [`ArtifactProvider`](crate::ArtifactProvider).
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("failed to read artifact {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a documentation backend fetch.
///
/// `Clone` because one in-flight fetch result is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("documentation not found: {0}")]
    NotFound(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("backend error: {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("empty documentation response for {0}")]
    Empty(String),

    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

/// Errors from a summarization backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("summarizer request failed: {0}")]
    Request(String),
}
