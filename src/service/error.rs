use crate::fetcher::error::FetchError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResolutionError {
    #[error("A numeric `id` or a `handle` is required to identify a user.")]
    MissingIdentifier,

    #[error("Failed to look up handle `{handle}`: {source}")]
    LookupFailed {
        handle: String,
        #[source]
        source: FetchError,
    },

    #[error("Unable to resolve an account id for handle `{handle}`.")]
    UnresolvedId { handle: String },
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("Subscription `{id}` not found.")]
    SubscriptionNotFound { id: String },

    #[error("Invalid callback URL `{url}`: {reason}")]
    InvalidCallbackUrl { url: String, reason: String },

    #[error("ResolutionError: {0}")]
    Resolution(#[from] ResolutionError),
}

impl ServiceError {
    pub fn not_found(id: &str) -> Self {
        Self::SubscriptionNotFound { id: id.to_string() }
    }
}
