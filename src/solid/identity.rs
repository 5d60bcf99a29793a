//! WebID profile discovery
//!
//! Dereferences a WebID and reads the identity provider and storage root
//! from its Turtle profile document.

use crate::error::{Error, Result};
use crate::rdf::{vocab, RdfDocument};
use serde::{Deserialize, Serialize};
use url::Url;

/// WebID Profile information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebIdProfile {
    /// The WebID IRI
    pub web_id: String,
    /// User's name (optional)
    pub name: Option<String>,
    /// OIDC Issuer IRI
    pub oidc_issuer: Option<String>,
    /// Storage location (Pod IRI)
    pub storage: Option<String>,
}

impl WebIdProfile {
    /// Extract profile fields from a Turtle document
    pub fn from_turtle(web_id: &str, body: &[u8]) -> Result<Self> {
        let base = document_url(web_id)?;
        let doc = RdfDocument::parse_turtle(body, base.as_str())
            .map_err(|e| Error::InvalidWebId(format!("{}: {}", web_id, e)))?;

        Ok(Self {
            web_id: web_id.to_string(),
            name: doc.object_of(Some(web_id), vocab::FOAF_NAME)?,
            oidc_issuer: doc.object_of(Some(web_id), vocab::SOLID_OIDC_ISSUER)?,
            storage: doc.object_of(Some(web_id), vocab::PIM_STORAGE)?,
        })
    }

    /// Get the OIDC issuer, or return error if not set
    pub fn require_oidc_issuer(&self) -> Result<Url> {
        let issuer = self.oidc_issuer.as_deref().ok_or_else(|| {
            Error::InvalidWebId(format!(
                "{} does not specify a solid:oidcIssuer",
                self.web_id
            ))
        })?;
        Url::parse(issuer)
            .map_err(|e| Error::InvalidWebId(format!("invalid OIDC issuer {}: {}", issuer, e)))
    }

    /// Get the storage root, always ending in `/`
    pub fn require_storage(&self) -> Result<String> {
        let storage = self
            .storage
            .as_deref()
            .ok_or_else(|| Error::MissingStorageRoot(self.web_id.clone()))?;
        if storage.ends_with('/') {
            Ok(storage.to_string())
        } else {
            Ok(format!("{}/", storage))
        }
    }
}

/// The WebID without its fragment, i.e. the profile document URL
fn document_url(web_id: &str) -> Result<Url> {
    let mut url = Url::parse(web_id.trim())
        .map_err(|e| Error::InvalidWebId(format!("{} is not a URL: {}", web_id, e)))?;
    url.set_fragment(None);
    Ok(url)
}

/// Fetch and parse a WebID profile
///
/// An unparsable URL or document is [`Error::InvalidWebId`]; a transport
/// failure or non-2xx status is [`Error::UnreachableWebId`].
pub async fn fetch_profile(client: &reqwest::Client, web_id: &str) -> Result<WebIdProfile> {
    let url = document_url(web_id)?;
    tracing::debug!(web_id = %web_id, "Fetching WebID profile");

    let response = client
        .get(url)
        .header("Accept", "text/turtle")
        .send()
        .await
        .map_err(|e| Error::UnreachableWebId(format!("{}: {}", web_id, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::UnreachableWebId(format!(
            "{} returned {}",
            web_id, status
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::UnreachableWebId(format!("{}: {}", web_id, e)))?;
    WebIdProfile::from_turtle(web_id, &body)
}

/// Discover the identity provider advertised by a WebID
pub async fn discover_provider(client: &reqwest::Client, web_id: &str) -> Result<String> {
    let profile = fetch_profile(client, web_id).await?;
    let issuer = profile.require_oidc_issuer()?;
    tracing::info!(web_id = %web_id, issuer = %issuer, "Discovered identity provider");
    Ok(issuer.to_string())
}
