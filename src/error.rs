//! Error types for Context Viewer auth

use std::io;

use thiserror::Error;

use crate::oauth::AcquisitionFailure;

/// Result type alias for Context Viewer auth
pub type Result<T> = std::result::Result<T, Error>;

/// Context Viewer auth errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing OAuth client id/secret, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential could not be decoded into an identity
    #[error("Invalid credential: {0}")]
    Decode(String),

    /// Email is not on the allow-list
    #[error("Unauthorized user: {0}")]
    Unauthorized(String),

    /// Token acquisition failed
    #[error("Token acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionFailure),

    /// A downstream call rejected the token and no fresh one could be obtained
    #[error("Session expired. Please sign in again.")]
    SessionExpired,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same action can succeed.
    ///
    /// Configuration and allow-list failures are final for the credential
    /// that produced them.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Decode(_) | Self::Unauthorized(_) => false,
            Self::Acquisition(failure) => failure.is_retryable(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_not_retryable() {
        assert!(!Error::Config("no client id".into()).is_retryable());
        assert!(!Error::Unauthorized("x@y.com".into()).is_retryable());
        assert!(!Error::Decode("bad".into()).is_retryable());
        assert!(!Error::Acquisition(AcquisitionFailure::Unauthorized).is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::SessionExpired.is_retryable());
        assert!(Error::Acquisition(AcquisitionFailure::Network("timeout".into())).is_retryable());
    }
}
