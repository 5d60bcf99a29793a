//! Durable session and client-registration state
//!
//! Every field lives under a flat key in a sled tree. Writes are applied as
//! one `sled::Batch` and flushed before the in-memory snapshot is replaced,
//! so readers only ever observe fully committed records.

use crate::error::{Error, Result};
use futures::Stream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Persisted key names
pub mod keys {
    /// WebID of the signed-in user
    pub const WEB_ID: &str = "web_id";
    /// DPoP-bound access token
    pub const ACCESS_TOKEN: &str = "access_token";
    /// Refresh token
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Identity token
    pub const ID_TOKEN: &str = "id_token";
    /// Absolute expiry in epoch milliseconds
    pub const TOKEN_EXPIRES_AT: &str = "token_expires_at";
    /// Client id from dynamic registration
    pub const CLIENT_ID: &str = "client_id";
    /// Client secret from dynamic registration
    pub const CLIENT_SECRET: &str = "client_secret";
    /// Token endpoint
    pub const TOKEN_URI: &str = "token_uri";
    /// PKCE code verifier
    pub const CODE_VERIFIER: &str = "code_verifier";
    /// Identity provider
    pub const OIDC_PROVIDER: &str = "oidc_provider";
    /// Registered redirect URI
    pub const REDIRECT_URI: &str = "redirect_uri";
    /// Private P-256 signing key as a JWK
    pub const SIGNER: &str = "signer";
}

/// Fields reset by [`CredentialStore::clear_auth`]
const SESSION_KEYS: [&str; 6] = [
    keys::ACCESS_TOKEN,
    keys::ID_TOKEN,
    keys::REFRESH_TOKEN,
    keys::WEB_ID,
    keys::SIGNER,
    keys::TOKEN_EXPIRES_AT,
];

/// A single persisted field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    /// WebID of the signed-in user
    WebId,
    /// Access token
    AccessToken,
    /// Refresh token
    RefreshToken,
    /// Identity token
    IdToken,
    /// Expiry in epoch milliseconds
    TokenExpiresAt,
    /// Client id
    ClientId,
    /// Client secret
    ClientSecret,
    /// Token endpoint
    TokenUri,
    /// PKCE verifier
    CodeVerifier,
    /// Identity provider
    OidcProvider,
    /// Redirect URI
    RedirectUri,
    /// Serialized signing key
    Signer,
}

impl CredentialField {
    /// Every field, in persisted-key order
    pub const ALL: [CredentialField; 12] = [
        CredentialField::WebId,
        CredentialField::AccessToken,
        CredentialField::RefreshToken,
        CredentialField::IdToken,
        CredentialField::TokenExpiresAt,
        CredentialField::ClientId,
        CredentialField::ClientSecret,
        CredentialField::TokenUri,
        CredentialField::CodeVerifier,
        CredentialField::OidcProvider,
        CredentialField::RedirectUri,
        CredentialField::Signer,
    ];

    /// Persisted key name
    pub fn key(self) -> &'static str {
        match self {
            CredentialField::WebId => keys::WEB_ID,
            CredentialField::AccessToken => keys::ACCESS_TOKEN,
            CredentialField::RefreshToken => keys::REFRESH_TOKEN,
            CredentialField::IdToken => keys::ID_TOKEN,
            CredentialField::TokenExpiresAt => keys::TOKEN_EXPIRES_AT,
            CredentialField::ClientId => keys::CLIENT_ID,
            CredentialField::ClientSecret => keys::CLIENT_SECRET,
            CredentialField::TokenUri => keys::TOKEN_URI,
            CredentialField::CodeVerifier => keys::CODE_VERIFIER,
            CredentialField::OidcProvider => keys::OIDC_PROVIDER,
            CredentialField::RedirectUri => keys::REDIRECT_URI,
            CredentialField::Signer => keys::SIGNER,
        }
    }
}

/// In-memory view of every persisted field
///
/// String fields default to `""` and the expiry to `0`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    /// WebID of the signed-in user
    pub web_id: String,
    /// DPoP-bound access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Identity token
    pub id_token: String,
    /// Absolute expiry in epoch milliseconds, 0 when unknown
    pub token_expires_at: i64,
    /// Client id from dynamic registration
    pub client_id: String,
    /// Client secret, empty for public clients
    pub client_secret: String,
    /// Token endpoint
    pub token_uri: String,
    /// PKCE code verifier
    pub code_verifier: String,
    /// Identity provider
    pub oidc_provider: String,
    /// Registered redirect URI
    pub redirect_uri: String,
    /// Private signing key as a JWK string
    pub signer: String,
}

impl CredentialRecord {
    /// Whether the session can authorize resource requests
    ///
    /// Requires web id, access token, signing key and expiry, with the
    /// expiry more than `skew` past `now_ms`.
    pub fn is_valid(&self, now_ms: i64, skew: Duration) -> bool {
        !self.web_id.is_empty()
            && !self.access_token.is_empty()
            && !self.signer.is_empty()
            && self.token_expires_at != 0
            && self.token_expires_at > now_ms + skew.as_millis() as i64
    }

    /// String value of a field
    pub fn get(&self, field: CredentialField) -> String {
        match field {
            CredentialField::WebId => self.web_id.clone(),
            CredentialField::AccessToken => self.access_token.clone(),
            CredentialField::RefreshToken => self.refresh_token.clone(),
            CredentialField::IdToken => self.id_token.clone(),
            CredentialField::TokenExpiresAt => self.token_expires_at.to_string(),
            CredentialField::ClientId => self.client_id.clone(),
            CredentialField::ClientSecret => self.client_secret.clone(),
            CredentialField::TokenUri => self.token_uri.clone(),
            CredentialField::CodeVerifier => self.code_verifier.clone(),
            CredentialField::OidcProvider => self.oidc_provider.clone(),
            CredentialField::RedirectUri => self.redirect_uri.clone(),
            CredentialField::Signer => self.signer.clone(),
        }
    }

    fn apply(&mut self, field: CredentialField, value: &str) {
        match field {
            CredentialField::WebId => self.web_id = value.to_string(),
            CredentialField::AccessToken => self.access_token = value.to_string(),
            CredentialField::RefreshToken => self.refresh_token = value.to_string(),
            CredentialField::IdToken => self.id_token = value.to_string(),
            CredentialField::TokenExpiresAt => {
                self.token_expires_at = value.parse().unwrap_or_default()
            }
            CredentialField::ClientId => self.client_id = value.to_string(),
            CredentialField::ClientSecret => self.client_secret = value.to_string(),
            CredentialField::TokenUri => self.token_uri = value.to_string(),
            CredentialField::CodeVerifier => self.code_verifier = value.to_string(),
            CredentialField::OidcProvider => self.oidc_provider = value.to_string(),
            CredentialField::RedirectUri => self.redirect_uri = value.to_string(),
            CredentialField::Signer => self.signer = value.to_string(),
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "***REDACTED***" };
        f.debug_struct("CredentialRecord")
            .field("web_id", &self.web_id)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("id_token", &redact(&self.id_token))
            .field("token_expires_at", &self.token_expires_at)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("token_uri", &self.token_uri)
            .field("code_verifier", &redact(&self.code_verifier))
            .field("oidc_provider", &self.oidc_provider)
            .field("redirect_uri", &self.redirect_uri)
            .field("signer", &redact(&self.signer))
            .finish()
    }
}

/// Result of a successful code exchange or refresh
///
/// The access token, signing key and expiry are always written together.
/// Optional fields are only written when present.
#[derive(Clone, Default)]
pub struct TokenUpdate {
    /// New access token
    pub access_token: String,
    /// Signing key the access token is bound to
    pub signer: String,
    /// Absolute expiry in epoch milliseconds
    pub expires_at: i64,
    /// Rotated refresh token
    pub refresh_token: Option<String>,
    /// Identity token
    pub id_token: Option<String>,
    /// WebID claim from the identity token
    pub web_id: Option<String>,
}

/// Durable credential store
///
/// Cheap to clone; clones share the same database and snapshot channel.
#[derive(Clone)]
pub struct CredentialStore {
    tree: sled::Tree,
    state: Arc<watch::Sender<CredentialRecord>>,
    write_lock: Arc<Mutex<()>>,
}

impl CredentialStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Open a throwaway store that is deleted on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    /// Use the `credentials` tree of an already-open database
    pub fn from_db(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree("credentials")?;

        let mut record = CredentialRecord::default();
        for field in CredentialField::ALL {
            if let Some(value) = tree.get(field.key())? {
                let value = std::str::from_utf8(&value)
                    .map_err(|e| Error::storage(format!("{} is not UTF-8: {}", field.key(), e)))?;
                record.apply(field, value);
            }
        }

        let (state, _) = watch::channel(record);
        Ok(Self {
            tree,
            state: Arc::new(state),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Current full record
    pub fn snapshot(&self) -> CredentialRecord {
        self.state.borrow().clone()
    }

    /// Receiver notified after every committed write
    pub fn subscribe(&self) -> watch::Receiver<CredentialRecord> {
        self.state.subscribe()
    }

    /// Live stream of a projection of the record
    ///
    /// Yields the current value immediately, then again after each committed
    /// write. Each call starts a fresh stream.
    pub fn watch<T, F>(&self, project: F) -> impl Stream<Item = T> + Send + 'static
    where
        F: Fn(&CredentialRecord) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let mut rx = self.state.subscribe();
        async_stream::stream! {
            loop {
                let value = project(&*rx.borrow_and_update());
                yield value;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Live stream of one field rendered as a string
    pub fn get(&self, field: CredentialField) -> impl Stream<Item = String> + Send + 'static {
        self.watch(move |record| record.get(field))
    }

    /// Live stream of the WebID
    pub fn web_id(&self) -> impl Stream<Item = String> + Send + 'static {
        self.watch(|record| record.web_id.clone())
    }

    /// Live stream of the token expiry
    pub fn token_expires_at(&self) -> impl Stream<Item = i64> + Send + 'static {
        self.watch(|record| record.token_expires_at)
    }

    /// Persist one field
    pub async fn set(&self, field: CredentialField, value: impl Into<String>) -> Result<()> {
        self.set_many(vec![(field, value.into())]).await
    }

    /// Persist the token expiry
    pub async fn set_token_expires_at(&self, expires_at: i64) -> Result<()> {
        self.set(CredentialField::TokenExpiresAt, expires_at.to_string())
            .await
    }

    /// Persist several fields in one transaction
    pub async fn set_many(&self, values: Vec<(CredentialField, String)>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut batch = sled::Batch::default();
        for (field, value) in &values {
            batch.insert(field.key(), value.as_bytes());
        }
        self.commit(batch).await?;

        self.state.send_modify(|record| {
            for (field, value) in &values {
                record.apply(*field, value);
            }
        });
        Ok(())
    }

    /// Write the result of a code exchange or refresh as one unit
    pub async fn store_session_tokens(&self, update: TokenUpdate) -> Result<()> {
        let mut values = vec![
            (CredentialField::AccessToken, update.access_token),
            (CredentialField::Signer, update.signer),
            (CredentialField::TokenExpiresAt, update.expires_at.to_string()),
        ];
        if let Some(refresh_token) = update.refresh_token {
            values.push((CredentialField::RefreshToken, refresh_token));
        }
        if let Some(id_token) = update.id_token {
            values.push((CredentialField::IdToken, id_token));
        }
        if let Some(web_id) = update.web_id {
            values.push((CredentialField::WebId, web_id));
        }
        self.set_many(values).await
    }

    /// Reset the session fields in one durable transaction
    ///
    /// Clears access, id and refresh tokens, the web id, the signing key and
    /// the expiry. Client registration survives so the user can sign in again
    /// against the same provider.
    pub async fn clear_auth(&self) -> Result<()> {
        self.remove_keys(&SESSION_KEYS, |record| {
            record.access_token.clear();
            record.id_token.clear();
            record.refresh_token.clear();
            record.web_id.clear();
            record.signer.clear();
            record.token_expires_at = 0;
        })
        .await
    }

    /// Reset every field, including client registration
    pub async fn sign_out(&self) -> Result<()> {
        let all: Vec<&str> = CredentialField::ALL.iter().map(|f| f.key()).collect();
        self.remove_keys(&all, |record| *record = CredentialRecord::default())
            .await
    }

    async fn remove_keys(&self, keys: &[&str], reset: impl FnOnce(&mut CredentialRecord)) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(*key);
        }
        self.commit(batch).await?;

        self.state.send_modify(reset);
        Ok(())
    }

    async fn commit(&self, batch: sled::Batch) -> Result<()> {
        self.tree.apply_batch(batch)?;
        self.tree.flush_async().await?;
        Ok(())
    }
}
