//! Error types for the SolidFit sync core

use thiserror::Error;

/// Result type alias for SolidFit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classes used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Timeouts, TLS failures, non-2xx statuses
    Transport,
    /// Malformed WebID documents, missing OIDC configuration fields
    Protocol,
    /// Unparsable signing keys, absent or expired tokens
    Credential,
    /// Missing records, RDF or JSON decoding failures
    Data,
}

/// Main error type for the SolidFit sync core
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A request completed with a non-success status
    #[error("{context} failed with status {status}")]
    Status {
        /// What was being attempted
        context: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// The Pod rejected the access token (401/403)
    #[error("Unauthorized: {context} returned {status}")]
    Unauthorized {
        /// What was being attempted
        context: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// The WebID document could not be parsed or lacks an OIDC issuer
    #[error("Invalid WebID: {0}")]
    InvalidWebId(String),

    /// The WebID document could not be fetched
    #[error("WebID unreachable: {0}")]
    UnreachableWebId(String),

    /// A required field is missing from the provider configuration
    #[error("Provider configuration is missing `{0}`")]
    MissingProviderField(&'static str),

    /// The WebID profile has no storage root
    #[error("WebID profile does not specify a storage root: {0}")]
    MissingStorageRoot(String),

    /// The authorization server redirected back with an error
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The redirect callback did not carry an authorization code
    #[error("Missing authorization code in redirect: {0}")]
    MissingAuthorizationCode(String),

    /// The stored signing key is not a valid P-256 JWK
    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    /// DPoP proof or token encoding failed
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// No usable session (token, key or web id absent, or expired)
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Refreshing the session failed and the user was logged out
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// A token endpoint response lacked a required field
    #[error("Token response is missing `{0}`")]
    MissingTokenField(&'static str),

    /// Record lookup failed
    #[error("Workout not found: {0}")]
    NotFound(String),

    /// RDF parse or serialization error
    #[error("RDF error: {0}")]
    Rdf(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Media could not be read or uploaded
    #[error("Media error: {0}")]
    Media(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidInput(format!("invalid URL: {}", err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl Error {
    /// Create a status error for a failed request
    pub fn status(context: impl Into<String>, status: u16) -> Self {
        Self::Status {
            context: context.into(),
            status,
        }
    }

    /// Create an RDF error
    pub fn rdf(msg: impl Into<String>) -> Self {
        Self::Rdf(msg.into())
    }

    /// Create a media error
    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-authenticated error
    pub fn not_authenticated(msg: impl Into<String>) -> Self {
        Self::NotAuthenticated(msg.into())
    }

    /// Taxonomy class of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Http(_) | Error::Status { .. } | Error::UnreachableWebId(_) => {
                ErrorCategory::Transport
            }
            Error::InvalidWebId(_)
            | Error::MissingProviderField(_)
            | Error::MissingStorageRoot(_)
            | Error::AuthorizationDenied(_)
            | Error::MissingAuthorizationCode(_)
            | Error::MissingTokenField(_)
            | Error::Config(_)
            | Error::InvalidInput(_) => ErrorCategory::Protocol,
            Error::Unauthorized { .. }
            | Error::InvalidSigningKey(_)
            | Error::Jwt(_)
            | Error::NotAuthenticated(_)
            | Error::RefreshFailed(_) => ErrorCategory::Credential,
            Error::NotFound(_)
            | Error::Rdf(_)
            | Error::Serialization(_)
            | Error::Media(_)
            | Error::Storage(_)
            | Error::Io(_) => ErrorCategory::Data,
        }
    }

    /// Whether the user can fix this by correcting their input
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Error::InvalidWebId(_) | Error::UnreachableWebId(_) | Error::InvalidInput(_)
        )
    }

    /// Whether the Pod rejected the current access token
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(Error::status("GET", 503).category(), ErrorCategory::Transport);
        assert_eq!(
            Error::MissingProviderField("token_endpoint").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            Error::InvalidSigningKey("bad".into()).category(),
            ErrorCategory::Credential
        );
        assert_eq!(Error::NotFound("x".into()).category(), ErrorCategory::Data);
    }

    #[test]
    fn test_user_correctable() {
        assert!(Error::InvalidWebId("no issuer".into()).is_user_correctable());
        assert!(!Error::status("PUT", 500).is_user_correctable());
    }

    #[test]
    fn test_auth_failure() {
        let err = Error::Unauthorized {
            context: "GET".into(),
            status: 401,
        };
        assert!(err.is_auth_failure());
        assert!(!Error::status("GET", 404).is_auth_failure());
    }
}
