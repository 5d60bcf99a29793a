//! Solid-OIDC session lifecycle
//!
//! Drives login (discovery, registration, PKCE), the code exchange and
//! DPoP-bound refresh. All token state lives in the [`CredentialStore`]; the
//! session only adds the refresh gate and the observable [`AuthState`].

use crate::config::SolidFitConfig;
use crate::credentials::{CredentialField, CredentialRecord, CredentialStore, TokenUpdate};
use crate::error::{Error, Result};
use crate::solid::callback;
use crate::solid::dpop::DPoPKey;
use crate::solid::identity;
use crate::solid::registration::{self, PkcePair};
use crate::types::now_millis;
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use url::Url;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No session
    Unauthenticated,
    /// Authorization URL handed to the browser, waiting for the redirect
    AuthorizationPending,
    /// Code exchanged, tokens persisted
    TokenAcquired,
    /// Tokens are usable
    Valid,
    /// A refresh request is on the wire
    RefreshInFlight,
    /// Session cleared after a failed refresh or sign-out
    LoggedOut,
}

/// Authorization request ready for the external browser
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL to open
    pub url: Url,
    /// `state` value sent with the request
    pub state: String,
    /// Identity provider the request targets
    pub provider: String,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
}

/// Claims read from the identity token
#[derive(Debug, Deserialize)]
pub struct IdTokenClaims {
    /// Expiry (Unix seconds)
    pub exp: Option<i64>,
    /// Canonical WebID
    pub webid: Option<String>,
    /// Subject
    pub sub: Option<String>,
}

/// Read identity-token claims without verifying the signature
///
/// The token comes straight from the token endpoint over TLS; only the
/// expiry and WebID are used.
pub fn parse_id_token(id_token: &str) -> Result<IdTokenClaims> {
    let header = jsonwebtoken::decode_header(id_token)?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data =
        jsonwebtoken::decode::<IdTokenClaims>(id_token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Solid-OIDC session
///
/// Share behind an `Arc`; every method takes `&self`.
pub struct SolidSession {
    http: reqwest::Client,
    store: CredentialStore,
    config: SolidFitConfig,
    refresh_lock: Mutex<()>,
    state: watch::Sender<AuthState>,
}

impl SolidSession {
    /// Create a session over an existing credential store
    pub fn new(config: SolidFitConfig, http: reqwest::Client, store: CredentialStore) -> Self {
        let initial = if store
            .snapshot()
            .is_valid(now_millis(), config.expiry_skew())
        {
            AuthState::Valid
        } else {
            AuthState::Unauthenticated
        };
        let (state, _) = watch::channel(initial);

        Self {
            http,
            store,
            config,
            refresh_lock: Mutex::new(()),
            state,
        }
    }

    /// Credential store backing this session
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Configuration
    pub fn config(&self) -> &SolidFitConfig {
        &self.config
    }

    /// HTTP client shared with the Pod client
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: AuthState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Auth state transition");
        }
    }

    /// Whether stored tokens are usable right now, honoring the expiry skew
    pub fn is_valid(&self) -> bool {
        self.store
            .snapshot()
            .is_valid(now_millis(), self.config.expiry_skew())
    }

    // ─── Login ───────────────────────────────────────────────────────────────

    /// Start login from a user-entered WebID
    ///
    /// Fails with [`Error::InvalidWebId`] or [`Error::UnreachableWebId`] when
    /// the profile cannot be used; the latter should route the user to
    /// [`SolidSession::begin_login_with_provider`].
    pub async fn begin_login(&self, web_id: &str) -> Result<AuthorizationRequest> {
        let web_id = web_id.trim();
        self.store
            .set_many(vec![
                (CredentialField::WebId, web_id.to_string()),
                (CredentialField::RedirectUri, self.config.redirect_uri.clone()),
            ])
            .await?;

        let provider = identity::discover_provider(&self.http, web_id).await?;
        self.begin_login_with_provider(&provider).await
    }

    /// Start login against a known identity provider
    pub async fn begin_login_with_provider(&self, provider: &str) -> Result<AuthorizationRequest> {
        let provider_config = registration::fetch_provider_config(&self.http, provider).await?;

        let redirect_uri = self.config.redirect_uri.clone();
        let client = registration::register_client(
            &self.http,
            &provider_config.registration_endpoint,
            &self.config.app_name,
            std::slice::from_ref(&redirect_uri),
            false,
        )
        .await?;

        let pkce = PkcePair::generate();
        let state = registration::random_state();
        let url = registration::build_authorization_request(
            &provider_config.authorization_endpoint,
            &client.client_id,
            &pkce.challenge,
            &redirect_uri,
            &state,
        )?;

        self.store
            .set_many(vec![
                (CredentialField::OidcProvider, provider.to_string()),
                (CredentialField::TokenUri, provider_config.token_endpoint),
                (CredentialField::RedirectUri, redirect_uri),
                (CredentialField::ClientId, client.client_id.clone()),
                (
                    CredentialField::ClientSecret,
                    client.client_secret().unwrap_or_default().to_string(),
                ),
                (CredentialField::CodeVerifier, pkce.verifier),
            ])
            .await?;

        tracing::info!(provider = %provider, client_id = %client.client_id, "Authorization request ready");
        self.set_state(AuthState::AuthorizationPending);

        Ok(AuthorizationRequest {
            url,
            state,
            provider: provider.to_string(),
        })
    }

    /// Finish login from the redirect URI delivered by the platform
    ///
    /// When `expected_state` is given it must match the echoed `state`.
    pub async fn complete_login(&self, redirect: &str, expected_state: Option<&str>) -> Result<()> {
        let params = callback::parse_callback(redirect)?;
        if let Some(expected) = expected_state {
            if params.state.as_deref() != Some(expected) {
                return Err(Error::AuthorizationDenied("state mismatch".into()));
            }
        }
        self.exchange_code(&params.code).await
    }

    /// Exchange an authorization code for DPoP-bound tokens
    ///
    /// Generates the session's signing key. A non-2xx response is fatal; an
    /// unparsable identity token only costs the id-token expiry and WebID.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let record = self.store.snapshot();
        if record.token_uri.is_empty() || record.code_verifier.is_empty() {
            return Err(Error::not_authenticated(
                "no pending authorization; start login first",
            ));
        }
        let redirect_uri = if record.redirect_uri.is_empty() {
            self.config.redirect_uri.as_str()
        } else {
            record.redirect_uri.as_str()
        };

        let key = DPoPKey::generate();
        let proof = key.proof("POST", &record.token_uri, None)?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", record.code_verifier.as_str()),
            ("redirect_uri", redirect_uri),
            ("client_id", record.client_id.as_str()),
        ];
        if !record.client_secret.is_empty() {
            form.push(("client_secret", record.client_secret.as_str()));
        }

        let tokens = self
            .post_token_request(&record.token_uri, &proof, &form, "token exchange")
            .await?;

        let mut update = TokenUpdate {
            access_token: tokens
                .access_token
                .filter(|t| !t.is_empty())
                .ok_or(Error::MissingTokenField("access_token"))?,
            signer: key.to_jwk_string(),
            // A new grant never inherits the expiry of an earlier session.
            expires_at: 0,
            refresh_token: tokens.refresh_token.filter(|t| !t.is_empty()),
            id_token: None,
            web_id: None,
        };
        apply_token_metadata(&mut update, tokens.expires_in, tokens.id_token);

        self.store.store_session_tokens(update).await?;
        self.set_state(AuthState::TokenAcquired);
        tracing::info!("Authorization code exchanged");

        if self.is_valid() {
            self.set_state(AuthState::Valid);
        }
        Ok(())
    }

    // ─── Refresh ─────────────────────────────────────────────────────────────

    /// Return usable credentials, refreshing first if they are near expiry
    ///
    /// A stale session without a refresh token is logged out.
    pub async fn ensure_fresh(&self) -> Result<CredentialRecord> {
        let record = self.store.snapshot();
        if record.is_valid(now_millis(), self.config.expiry_skew()) {
            return Ok(record);
        }

        if record.access_token.is_empty() && record.refresh_token.is_empty() {
            return Err(Error::not_authenticated("no active session"));
        }
        if record.refresh_token.is_empty() {
            self.force_logout().await?;
            return Err(Error::not_authenticated(
                "session expired and cannot be refreshed",
            ));
        }

        self.refresh_from(&record.access_token).await
    }

    /// React to a 401/403 for `rejected_token`
    ///
    /// Refreshes unless another caller already replaced that token.
    pub async fn handle_unauthorized(&self, rejected_token: &str) -> Result<CredentialRecord> {
        tracing::debug!("Pod rejected access token, refreshing");
        self.refresh_from(rejected_token).await
    }

    /// Refresh the current access token
    pub async fn refresh(&self) -> Result<CredentialRecord> {
        let observed = self.store.snapshot().access_token;
        self.refresh_from(&observed).await
    }

    /// Single-flight refresh of the token the caller observed
    ///
    /// Callers that queued behind a refresh see its outcome instead of
    /// issuing their own request.
    async fn refresh_from(&self, observed: &str) -> Result<CredentialRecord> {
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed (or logged out) while we waited.
        let current = self.store.snapshot();
        if current.access_token != observed {
            if current.access_token.is_empty() {
                return Err(Error::RefreshFailed(
                    "session ended while waiting for refresh".into(),
                ));
            }
            return Ok(current);
        }

        self.set_state(AuthState::RefreshInFlight);
        match self.request_refresh(&current).await {
            Ok(()) => {
                self.set_state(AuthState::Valid);
                tracing::info!("Token refresh succeeded");
                Ok(self.store.snapshot())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, logging out");
                self.force_logout().await?;
                Err(Error::RefreshFailed(e.to_string()))
            }
        }
    }

    async fn request_refresh(&self, record: &CredentialRecord) -> Result<()> {
        if record.refresh_token.is_empty() {
            return Err(Error::not_authenticated("no refresh token"));
        }
        if record.token_uri.is_empty() {
            return Err(Error::not_authenticated("no token endpoint"));
        }

        let key = DPoPKey::from_jwk_str(&record.signer)?;
        let proof = key.proof("POST", &record.token_uri, None)?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", record.refresh_token.as_str()),
            ("client_id", record.client_id.as_str()),
        ];
        if !record.client_secret.is_empty() {
            form.push(("client_secret", record.client_secret.as_str()));
        }

        let tokens = self
            .post_token_request(&record.token_uri, &proof, &form, "token refresh")
            .await?;

        let mut update = TokenUpdate {
            access_token: tokens
                .access_token
                .filter(|t| !t.is_empty())
                .ok_or(Error::MissingTokenField("access_token"))?,
            signer: record.signer.clone(),
            expires_at: record.token_expires_at,
            refresh_token: tokens.refresh_token.filter(|t| !t.is_empty()),
            id_token: None,
            web_id: None,
        };
        apply_token_metadata(&mut update, tokens.expires_in, tokens.id_token);

        self.store.store_session_tokens(update).await
    }

    async fn post_token_request(
        &self,
        token_uri: &str,
        proof: &str,
        form: &[(&str, &str)],
        context: &str,
    ) -> Result<TokenResponse> {
        let response = self
            .http
            .post(token_uri)
            .header("Accept", "*/*")
            .header("DPoP", proof)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::status(context, status.as_u16()));
        }
        Ok(response.json().await?)
    }

    // ─── Logout ──────────────────────────────────────────────────────────────

    /// Clear the session and transition to [`AuthState::LoggedOut`]
    ///
    /// Safe to call concurrently; the clear is one atomic write.
    pub async fn force_logout(&self) -> Result<()> {
        self.store.clear_auth().await?;
        self.set_state(AuthState::LoggedOut);
        tracing::info!("Session cleared");
        Ok(())
    }

    /// Clear everything, including client registration
    pub async fn sign_out(&self) -> Result<()> {
        self.store.sign_out().await?;
        self.set_state(AuthState::LoggedOut);
        tracing::info!("Signed out");
        Ok(())
    }
}

/// Fill expiry, identity token and WebID from a token response
///
/// `expires_in` sets the expiry first; an identity-token `exp` overrides it.
fn apply_token_metadata(update: &mut TokenUpdate, expires_in: Option<i64>, id_token: Option<String>) {
    if let Some(seconds) = expires_in.filter(|s| *s > 0) {
        update.expires_at = now_millis() + seconds * 1000;
    }

    let Some(id_token) = id_token.filter(|t| !t.is_empty()) else {
        return;
    };
    match parse_id_token(&id_token) {
        Ok(claims) => {
            if let Some(exp) = claims.exp {
                update.expires_at = exp * 1000;
            }
            if let Some(web_id) = claims.webid.filter(|w| !w.is_empty()) {
                update.web_id = Some(web_id);
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not parse id token, keeping fallback expiry");
        }
    }
    update.id_token = Some(id_token);
}
