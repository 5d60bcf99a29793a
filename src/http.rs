//! Shared HTTP client construction

use crate::config::{SolidFitConfig, TlsPolicy};
use crate::error::Result;

/// Build the client used for identity provider and Pod traffic
pub fn build_client(config: &SolidFitConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("solidfit-sync/", env!("CARGO_PKG_VERSION")));

    if config.tls_policy == TlsPolicy::AcceptInvalidCerts {
        tracing::warn!(
            "TLS certificate validation is DISABLED; only use this against development Pod servers"
        );
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}

/// Whether a status code means the access token was rejected
pub fn is_auth_rejection(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
}
