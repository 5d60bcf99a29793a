//! Authenticated Pod access
//!
//! Every request carries `Authorization: DPoP <token>` and a fresh proof
//! bound to its method, URL and token. A 401/403 triggers one refresh and a
//! single retry.

use crate::credentials::CredentialRecord;
use crate::error::{Error, Result};
use crate::http::is_auth_rejection;
use crate::rdf::vocab;
use crate::solid::auth::SolidSession;
use crate::solid::dpop::build_proof;
use crate::solid::identity;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Minimal container description sent when creating a container
const CONTAINER_BODY: &str = "@prefix ldp: <http://www.w3.org/ns/ldp#> .\n<> a ldp:BasicContainer, ldp:Container .\n";

/// How [`PodClient::ensure_container`] satisfied the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// Container was already there (HEAD succeeded, or a create got 409)
    Exists,
    /// Created with a PUT to the container URL
    CreatedViaPut,
    /// Created with a POST to the parent carrying a `Slug`
    CreatedViaPost,
}

fn link_type(iri: &str) -> String {
    format!("<{}>; rel=\"type\"", iri)
}

/// Client for DPoP-authenticated Pod requests
pub struct PodClient {
    session: Arc<SolidSession>,
    storage_roots: RwLock<HashMap<String, String>>,
}

impl PodClient {
    /// Create a client on top of a session
    pub fn new(session: Arc<SolidSession>) -> Self {
        Self {
            session,
            storage_roots: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<SolidSession> {
        &self.session
    }

    /// Storage root for `web_id`, fetched once and cached
    pub async fn storage_root(&self, web_id: &str) -> Result<String> {
        if let Some(root) = self.storage_roots.read().await.get(web_id) {
            return Ok(root.clone());
        }

        let profile = identity::fetch_profile(self.session.http(), web_id).await?;
        let root = profile.require_storage()?;
        tracing::debug!(web_id = %web_id, storage = %root, "Resolved storage root");

        self.storage_roots
            .write()
            .await
            .insert(web_id.to_string(), root.clone());
        Ok(root)
    }

    /// Cached storage root, without network access
    pub async fn cached_storage_root(&self, web_id: &str) -> Option<String> {
        self.storage_roots.read().await.get(web_id).cloned()
    }

    /// Send an authorized request, refreshing once on 401/403
    ///
    /// `decorate` may be called twice and must be repeatable.
    pub async fn send<F>(&self, method: Method, url: &str, decorate: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let credentials = self.session.ensure_fresh().await?;
        let response = self.send_once(&method, url, &credentials, &decorate).await?;
        if !is_auth_rejection(response.status()) {
            return Ok(response);
        }

        tracing::debug!(status = %response.status(), url = %url, "Retrying after token refresh");
        let credentials = self
            .session
            .handle_unauthorized(&credentials.access_token)
            .await?;
        let response = self.send_once(&method, url, &credentials, &decorate).await?;
        if is_auth_rejection(response.status()) {
            return Err(Error::Unauthorized {
                context: format!("{} {}", method, url),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn send_once<F>(
        &self,
        method: &Method,
        url: &str,
        credentials: &CredentialRecord,
        decorate: &F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let proof = build_proof(
            method.as_str(),
            url,
            &credentials.signer,
            Some(&credentials.access_token),
        )?;
        let request = self
            .session
            .http()
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("DPoP {}", credentials.access_token))
            .header("DPoP", proof);

        Ok(decorate(request).send().await?)
    }

    /// GET a Turtle resource
    pub async fn get_turtle(&self, url: &str) -> Result<Response> {
        self.send(Method::GET, url, |req| req.header("Accept", "text/turtle"))
            .await
    }

    /// Replace a Turtle resource with `body`
    pub async fn put_turtle(&self, url: &str, body: String) -> Result<()> {
        let body = Bytes::from(body);
        let response = self
            .send(Method::PUT, url, |req| {
                req.header(CONTENT_TYPE, "text/turtle")
                    .header("Link", link_type(vocab::LDP_RESOURCE))
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::status(format!("PUT {}", url), status.as_u16()));
        }
        Ok(())
    }

    /// Upload raw bytes
    pub async fn put_bytes(&self, url: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let response = self
            .send(Method::PUT, url, |req| {
                req.header(CONTENT_TYPE, content_type).body(bytes.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::status(format!("PUT {}", url), status.as_u16()));
        }
        Ok(())
    }

    /// Make sure a container exists, creating it if needed
    ///
    /// HEAD first. On 404, PUT a container description; if the server
    /// rejects that with 400 or 415, POST to the parent with a `Slug`.
    pub async fn ensure_container(&self, container_url: &str) -> Result<ContainerOutcome> {
        let container_url = if container_url.ends_with('/') {
            container_url.to_string()
        } else {
            format!("{}/", container_url)
        };

        let head = self.send(Method::HEAD, &container_url, |req| req).await?;
        match head.status() {
            s if s.is_success() => return Ok(ContainerOutcome::Exists),
            StatusCode::NOT_FOUND => {}
            s => return Err(Error::status(format!("HEAD {}", container_url), s.as_u16())),
        }

        let put = self
            .send(Method::PUT, &container_url, |req| {
                req.header("If-None-Match", "*")
                    .header("Link", link_type(vocab::LDP_BASIC_CONTAINER))
                    .header(CONTENT_TYPE, "text/turtle")
                    .body(CONTAINER_BODY)
            })
            .await?;
        match put.status() {
            s if s.is_success() => {
                tracing::info!(container = %container_url, "Created container via PUT");
                return Ok(ContainerOutcome::CreatedViaPut);
            }
            StatusCode::CONFLICT => return Ok(ContainerOutcome::Exists),
            StatusCode::BAD_REQUEST | StatusCode::UNSUPPORTED_MEDIA_TYPE => {}
            s => return Err(Error::status(format!("PUT {}", container_url), s.as_u16())),
        }

        let (parent, slug) = parent_and_slug(&container_url);
        let post = self
            .send(Method::POST, &parent, |req| {
                req.header("Link", link_type(vocab::LDP_BASIC_CONTAINER))
                    .header("Slug", slug.as_str())
                    .header(CONTENT_TYPE, "text/turtle")
                    .body(CONTAINER_BODY)
            })
            .await?;
        match post.status() {
            s if s.is_success() => {
                tracing::info!(container = %container_url, "Created container via POST to parent");
                Ok(ContainerOutcome::CreatedViaPost)
            }
            StatusCode::CONFLICT => Ok(ContainerOutcome::Exists),
            s => Err(Error::status(format!("POST {}", parent), s.as_u16())),
        }
    }
}

/// Split `https://pod/a/b/` into (`https://pod/a/`, `b`)
fn parent_and_slug(container_url: &str) -> (String, String) {
    let trimmed = container_url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, slug)) => (format!("{}/", parent), slug.to_string()),
        None => (container_url.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolidFitConfig;
    use crate::credentials::{CredentialField, CredentialStore};
    use crate::solid::dpop::DPoPKey;
    use crate::types::now_millis;
    use mockito::Matcher;

    async fn pod(server: &mockito::Server) -> PodClient {
        let store = CredentialStore::temporary().unwrap();
        store
            .set_many(vec![
                (CredentialField::WebId, format!("{}/profile/card#me", server.url())),
                (CredentialField::AccessToken, "at-1".into()),
                (CredentialField::RefreshToken, "rt-1".into()),
                (CredentialField::Signer, DPoPKey::generate().to_jwk_string()),
                (
                    CredentialField::TokenExpiresAt,
                    (now_millis() + 3_600_000).to_string(),
                ),
                (CredentialField::TokenUri, format!("{}/token", server.url())),
                (CredentialField::ClientId, "abc123".into()),
            ])
            .await
            .unwrap();
        let session = SolidSession::new(SolidFitConfig::default(), reqwest::Client::new(), store);
        PodClient::new(Arc::new(session))
    }

    #[test]
    fn test_parent_and_slug() {
        assert_eq!(
            parent_and_slug("https://pod.example/AndroidApplication/Images/SolidFit/"),
            (
                "https://pod.example/AndroidApplication/Images/".to_string(),
                "SolidFit".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_requests_carry_dpop_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data")
            .match_header("authorization", "DPoP at-1")
            .match_header("dpop", Matcher::Regex(r"^[\w-]+\.[\w-]+\.[\w-]+$".into()))
            .with_status(200)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let response = pod.get_turtle(&format!("{}/data", server.url())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_container_exists() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/images/")
            .with_status(200)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let outcome = pod
            .ensure_container(&format!("{}/images", server.url()))
            .await
            .unwrap();
        assert_eq!(outcome, ContainerOutcome::Exists);
    }

    #[tokio::test]
    async fn test_container_created_via_put() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/images/")
            .with_status(404)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/images/")
            .match_header("if-none-match", "*")
            .match_header(
                "link",
                "<http://www.w3.org/ns/ldp#BasicContainer>; rel=\"type\"",
            )
            .with_status(201)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let outcome = pod
            .ensure_container(&format!("{}/images/", server.url()))
            .await
            .unwrap();
        assert_eq!(outcome, ContainerOutcome::CreatedViaPut);
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_container_falls_back_to_post() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/a/images/")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("PUT", "/a/images/")
            .with_status(415)
            .create_async()
            .await;
        let post = server
            .mock("POST", "/a/")
            .match_header("slug", "images")
            .with_status(201)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let outcome = pod
            .ensure_container(&format!("{}/a/images/", server.url()))
            .await
            .unwrap();
        assert_eq!(outcome, ContainerOutcome::CreatedViaPost);
        post.assert_async().await;
    }

    #[tokio::test]
    async fn test_container_conflict_counts_as_exists() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/images/")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("PUT", "/images/")
            .with_status(409)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let outcome = pod
            .ensure_container(&format!("{}/images/", server.url()))
            .await
            .unwrap();
        assert_eq!(outcome, ContainerOutcome::Exists);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_and_retries_once() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/data")
            .match_header("authorization", "DPoP at-1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/data")
            .match_header("authorization", "DPoP at-2")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let response = pod.get_turtle(&format!("{}/data", server.url())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        rejected.assert_async().await;
        token.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_storage_root_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let card = server
            .mock("GET", "/profile/card")
            .with_status(200)
            .with_body("<#me> <http://www.w3.org/ns/pim/space#storage> </pod> .")
            .expect(1)
            .create_async()
            .await;

        let pod = pod(&server).await;
        let web_id = format!("{}/profile/card#me", server.url());
        let first = pod.storage_root(&web_id).await.unwrap();
        let second = pod.storage_root(&web_id).await.unwrap();

        assert_eq!(first, format!("{}/pod/", server.url()));
        assert_eq!(first, second);
        card.assert_async().await;
    }
}
