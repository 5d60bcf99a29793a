//! Shared fixtures for integration tests

#![allow(dead_code)]

use solidfit_sync::credentials::{CredentialField, CredentialStore};
use solidfit_sync::solid::{DPoPKey, PodClient, SolidSession};
use solidfit_sync::sync::{MemoryMediaSource, SledWorkoutStore, SyncEngine};
use solidfit_sync::types::now_millis;
use solidfit_sync::SolidFitConfig;
use std::sync::Arc;

/// WebID served by the mock server
pub fn web_id(server: &mockito::Server) -> String {
    format!("{}/profile/card#me", server.url())
}

/// Profile naming the mock server as both identity provider and storage
pub fn profile_card(server: &mockito::Server) -> String {
    format!(
        r#"@prefix solid: <http://www.w3.org/ns/solid/terms#> .
@prefix pim: <http://www.w3.org/ns/pim/space#> .
<#me> solid:oidcIssuer <{url}/> ;
      pim:storage <{url}/pod/> ."#,
        url = server.url()
    )
}

/// Credential store holding a live session against the mock server
pub async fn signed_in_store(server: &mockito::Server, expires_at: i64) -> CredentialStore {
    let store = CredentialStore::temporary().unwrap();
    store
        .set_many(vec![
            (CredentialField::WebId, web_id(server)),
            (CredentialField::AccessToken, "at-1".into()),
            (CredentialField::RefreshToken, "rt-1".into()),
            (CredentialField::Signer, DPoPKey::generate().to_jwk_string()),
            (CredentialField::TokenExpiresAt, expires_at.to_string()),
            (CredentialField::TokenUri, format!("{}/token", server.url())),
            (CredentialField::ClientId, "abc123".into()),
        ])
        .await
        .unwrap();
    store
}

/// Session valid for an hour
pub async fn signed_in_session(server: &mockito::Server) -> Arc<SolidSession> {
    let store = signed_in_store(server, now_millis() + 3_600_000).await;
    Arc::new(SolidSession::new(
        SolidFitConfig::default(),
        reqwest::Client::new(),
        store,
    ))
}

/// Sync engine over a signed-in session and throwaway stores
pub async fn engine(server: &mockito::Server) -> (SyncEngine, MemoryMediaSource) {
    let session = signed_in_session(server).await;
    let pod = Arc::new(PodClient::new(session));
    let media = MemoryMediaSource::new();
    let local = Arc::new(SledWorkoutStore::temporary().unwrap());
    (
        SyncEngine::new(pod, local, Arc::new(media.clone())).unwrap(),
        media,
    )
}

/// Mock the profile document
pub async fn mock_profile(server: &mut mockito::Server) -> mockito::Mock {
    let body = profile_card(server);
    server
        .mock("GET", "/profile/card")
        .with_status(200)
        .with_header("content-type", "text/turtle")
        .with_body(body)
        .create_async()
        .await
}

/// Turtle workout document with the given `(id, name)` pairs
pub fn workouts_document(server: &mockito::Server, items: &[(&str, &str)]) -> String {
    let mut body = String::from("@prefix ci: <http://www.w3.org/2024/ci/core#> .\n");
    for (id, name) in items {
        body.push_str(&format!(
            "<{}/pod/AndroidApplication/SolidFit#{}> ci:name \"{}\" ; ci:dateCreated \"1\"^^<http://www.w3.org/2001/XMLSchema#long> .\n",
            server.url(),
            id,
            name
        ));
    }
    body
}
