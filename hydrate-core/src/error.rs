//! Error types for the hydrate core.

use thiserror::Error;

/// Errors that can occur in hydrate operations.
#[derive(Error, Debug)]
pub enum HydrateError {
    #[error("Network unavailable: {0}")]
    Connectivity(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Rate limited by backend")]
    RateLimited,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Local store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No active session")]
    NoSession,

    #[error("Account linking already in progress for this sign-in")]
    LinkInProgress,

    #[error("No pending account link {0}")]
    UnknownLink(uuid::Uuid),

    #[error("Request superseded by a newer request for the same key")]
    Superseded,
}

impl HydrateError {
    /// True when the failure is purely about reaching the backend.
    ///
    /// These never change identity state and always degrade through the
    /// fallback chain.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, HydrateError::Connectivity(_) | HydrateError::Timeout(_))
    }
}

impl From<serde_json::Error> for HydrateError {
    fn from(e: serde_json::Error) -> Self {
        HydrateError::Serialization(e.to_string())
    }
}

/// Result type alias for hydrate operations.
pub type HydrateResult<T> = Result<T, HydrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(HydrateError::Connectivity("dns".into()).is_connectivity());
        assert!(HydrateError::Timeout(10_000).is_connectivity());
        assert!(!HydrateError::Auth("expired".into()).is_connectivity());
        assert!(!HydrateError::RateLimited.is_connectivity());
        assert!(!HydrateError::Backend("500".into()).is_connectivity());
    }
}
