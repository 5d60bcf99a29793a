//! Provider configuration, dynamic client registration and PKCE

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Scopes requested from the identity provider
pub const SCOPES: &str = "openid offline_access webid";

/// PKCE verifier and its S256 challenge (RFC 7636)
#[derive(Clone)]
pub struct PkcePair {
    /// Code verifier kept until the code exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`
    pub challenge: String,
}

impl PkcePair {
    /// Generate a verifier from 32 random bytes
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// S256 challenge for a verifier
    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"***REDACTED***")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Random opaque value for the `state` parameter
pub fn random_state() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Endpoints advertised in `/.well-known/openid-configuration`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Dynamic client registration endpoint
    pub registration_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct RawProviderConfig {
    registration_endpoint: Option<String>,
    token_endpoint: Option<String>,
    authorization_endpoint: Option<String>,
}

/// Fetch the provider's OpenID configuration
///
/// Each of the three endpoints is required.
pub async fn fetch_provider_config(
    client: &reqwest::Client,
    provider: &str,
) -> Result<ProviderConfig> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        provider.trim_end_matches('/')
    );
    tracing::debug!(url = %url, "Fetching provider configuration");

    let response = client.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::status("provider configuration", status.as_u16()));
    }

    let raw: RawProviderConfig = response.json().await?;
    Ok(ProviderConfig {
        registration_endpoint: raw
            .registration_endpoint
            .ok_or(Error::MissingProviderField("registration_endpoint"))?,
        token_endpoint: raw
            .token_endpoint
            .ok_or(Error::MissingProviderField("token_endpoint"))?,
        authorization_endpoint: raw
            .authorization_endpoint
            .ok_or(Error::MissingProviderField("authorization_endpoint"))?,
    })
}

/// Dynamic registration request body
#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    redirect_uris: &'a [String],
    grant_types: [&'static str; 2],
    response_types: [&'static str; 1],
    token_endpoint_auth_method: &'static str,
    application_type: &'static str,
    scope: &'static str,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    client_secret: Option<String>,
}

/// Credentials issued by dynamic registration
#[derive(Clone)]
pub struct ClientRegistration {
    /// Client id
    pub client_id: String,
    /// Client secret; absent for public clients
    pub client_secret: Option<SecretString>,
}

impl ClientRegistration {
    /// The secret, if one was issued
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_ref().map(|s| s.expose_secret())
    }
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "***REDACTED***"),
            )
            .finish()
    }
}

/// Register a client with the identity provider
///
/// A missing `client_secret` in the response is normal for public clients.
pub async fn register_client(
    client: &reqwest::Client,
    registration_endpoint: &str,
    app_name: &str,
    redirect_uris: &[String],
    confidential: bool,
) -> Result<ClientRegistration> {
    let body = RegistrationRequest {
        client_name: app_name,
        redirect_uris,
        grant_types: ["authorization_code", "refresh_token"],
        response_types: ["code"],
        token_endpoint_auth_method: if confidential {
            "client_secret_basic"
        } else {
            "none"
        },
        application_type: "native",
        scope: SCOPES,
    };

    let response = client
        .post(registration_endpoint)
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::status("client registration", status.as_u16()));
    }

    let registration: RegistrationResponse = response.json().await?;
    if registration.client_secret.is_none() {
        tracing::debug!("No client_secret returned, registered as public client");
    }

    Ok(ClientRegistration {
        client_id: registration.client_id,
        client_secret: registration
            .client_secret
            .filter(|s| !s.is_empty())
            .map(SecretString::from),
    })
}

/// Build the authorization-code URL handed to the external browser
///
/// The client secret is never placed in the URL.
pub fn build_authorization_request(
    authorization_endpoint: &str,
    client_id: &str,
    code_challenge: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<Url> {
    let mut url = Url::parse(authorization_endpoint)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("prompt", "consent")
        .append_pair("state", state);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_pkce_verifier_shape() {
        let pair = PkcePair::generate();
        assert!((43..=128).contains(&pair.verifier.len()));
        assert!(pair
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._~".contains(c)));
        assert_ne!(pair.verifier, PkcePair::generate().verifier);
    }

    #[test]
    fn test_pkce_challenge_rfc7636_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            PkcePair::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_authorization_url() {
        let url = build_authorization_request(
            "https://idp.example/authorize",
            "abc123",
            "challenge",
            "app://www.solid-oidc.com/callback",
            "xyz",
        )
        .unwrap();

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "abc123");
        assert_eq!(pairs["redirect_uri"], "app://www.solid-oidc.com/callback");
        assert_eq!(pairs["scope"], "openid offline_access webid");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["state"], "xyz");
    }

    #[tokio::test]
    async fn test_missing_provider_field() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"authorization_endpoint":"https://idp.example/auth","token_endpoint":"https://idp.example/token"}"#)
            .create_async()
            .await;

        let err = fetch_provider_config(&reqwest::Client::new(), &server.url())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingProviderField("registration_endpoint")
        ));
    }

    #[tokio::test]
    async fn test_register_public_client() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/register")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "client_name": "SolidFit",
                "redirect_uris": ["app://www.solid-oidc.com/callback"],
                "token_endpoint_auth_method": "none",
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"client_id":"abc123"}"#)
            .create_async()
            .await;

        let registration = register_client(
            &reqwest::Client::new(),
            &format!("{}/register", server.url()),
            "SolidFit",
            &["app://www.solid-oidc.com/callback".to_string()],
            false,
        )
        .await
        .unwrap();

        assert_eq!(registration.client_id, "abc123");
        assert!(registration.client_secret().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_confidential_client() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/register")
            .with_status(201)
            .with_body(r#"{"client_id":"abc123","client_secret":"s3cret"}"#)
            .create_async()
            .await;

        let registration = register_client(
            &reqwest::Client::new(),
            &format!("{}/register", server.url()),
            "SolidFit",
            &["app://www.solid-oidc.com/callback".to_string()],
            true,
        )
        .await
        .unwrap();

        assert_eq!(registration.client_secret(), Some("s3cret"));
        assert!(!format!("{:?}", registration).contains("s3cret"));
    }
}
