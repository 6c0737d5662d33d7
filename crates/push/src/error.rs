//! Provider error taxonomy.

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,

    #[error("job has no delivery address")]
    MissingAddress,

    #[error("no provider registered for platform {0}")]
    UnsupportedPlatform(crate::Platform),

    /// The backend answered with a non-success status. `410` means the
    /// address is gone and should be cleaned up out of band.
    #[error("backend rejected notification with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{failed} job(s) in batch failed")]
    PartialBatch { failed: usize },

    #[error("{provider} is misconfigured: {message}")]
    Configuration { provider: String, message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ProviderError {
    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the address behind this failure is permanently invalid.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Rejected { status: 404 | 410, .. })
    }
}
