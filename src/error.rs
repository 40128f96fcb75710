//! Error types for svid-proxy

use std::io;

use thiserror::Error;

/// Result type alias for svid-proxy
pub type Result<T> = std::result::Result<T, Error>;

/// svid-proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No SPIFFE identity in the peer certificate chain (or no TLS at all)
    #[error("No SPIFFE identity presented")]
    NoIdentity,

    /// Identity present but no workspace binding exists for it
    #[error("No workspace bound to identity: {0}")]
    UnknownWorkspace(String),

    /// Binding store could not be queried
    #[error("Binding store unavailable: {0}")]
    LookupUnavailable(#[source] sqlx::Error),

    /// An inbound `X-Forwarded-Host` header was present but not usable
    #[error("Invalid X-Forwarded-Host header value")]
    InvalidHostOverride,

    /// Upstream could not be reached or timed out
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error outside of dispatch (e.g. client construction)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an authorization-stage failure (identity or
    /// binding), as opposed to a dispatch or infrastructure failure.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::NoIdentity | Self::UnknownWorkspace(_) | Self::LookupUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_flagged() {
        assert!(Error::NoIdentity.is_auth_failure());
        assert!(Error::UnknownWorkspace("spiffe://x/y".into()).is_auth_failure());
    }

    #[test]
    fn config_error_is_not_auth_failure() {
        assert!(!Error::Config("bad".into()).is_auth_failure());
    }
}
