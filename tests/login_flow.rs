//! End-to-end login against a mock identity provider

mod common;

use mockito::Matcher;
use solidfit_sync::credentials::CredentialStore;
use solidfit_sync::solid::{AuthState, SolidSession};
use solidfit_sync::{Error, SolidFitConfig};
use std::collections::HashMap;

fn session() -> SolidSession {
    SolidSession::new(
        SolidFitConfig::default(),
        reqwest::Client::new(),
        CredentialStore::temporary().unwrap(),
    )
}

async fn mock_provider(server: &mut mockito::Server) {
    let url = server.url();
    server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "issuer": format!("{url}/"),
                "authorization_endpoint": format!("{url}/authorize"),
                "token_endpoint": format!("{url}/token"),
                "registration_endpoint": format!("{url}/register"),
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/register")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"client_id":"abc123"}"#)
        .create_async()
        .await;
}

#[tokio::test]
async fn test_fresh_install_login() {
    let mut server = mockito::Server::new_async().await;
    common::mock_profile(&mut server).await;
    mock_provider(&mut server).await;

    let session = session();
    let request = session
        .begin_login(&common::web_id(&server))
        .await
        .unwrap();

    assert_eq!(session.state(), AuthState::AuthorizationPending);
    assert_eq!(request.provider, format!("{}/", server.url()));

    let params: HashMap<_, _> = request.url.query_pairs().into_owned().collect();
    assert_eq!(params["client_id"], "abc123");
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["redirect_uri"], "app://www.solid-oidc.com/callback");
    assert!(!params.contains_key("client_secret"));

    let stored = session.store().snapshot();
    assert_eq!(stored.client_id, "abc123");
    assert!(stored.client_secret.is_empty());
    assert!(!stored.code_verifier.is_empty());

    let token = server
        .mock("POST", "/token")
        .match_header("dpop", Matcher::Any)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "the-code".into()),
            Matcher::UrlEncoded("code_verifier".into(), stored.code_verifier.clone()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600}"#)
        .create_async()
        .await;

    let redirect = format!(
        "app://www.solid-oidc.com/callback?code=the-code&state={}",
        request.state
    );
    session
        .complete_login(&redirect, Some(&request.state))
        .await
        .unwrap();

    token.assert_async().await;
    assert_eq!(session.state(), AuthState::Valid);
    let stored = session.store().snapshot();
    assert_eq!(stored.access_token, "at-1");
    assert_eq!(stored.refresh_token, "rt-1");
    assert_eq!(stored.web_id, common::web_id(&server));
    assert!(!stored.signer.is_empty());
}

#[tokio::test]
async fn test_unreachable_web_id_is_user_correctable() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/profile/card")
        .with_status(404)
        .create_async()
        .await;

    let err = session()
        .begin_login(&common::web_id(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnreachableWebId(_)));
    assert!(err.is_user_correctable());
}

#[tokio::test]
async fn test_manual_provider_entry() {
    let mut server = mockito::Server::new_async().await;
    mock_provider(&mut server).await;

    let request = session()
        .begin_login_with_provider(&server.url())
        .await
        .unwrap();
    assert!(request
        .url
        .as_str()
        .starts_with(&format!("{}/authorize?", server.url())));
}

#[tokio::test]
async fn test_denied_redirect() {
    let session = session();
    let err = session
        .complete_login(
            "app://www.solid-oidc.com/callback?error=access_denied",
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthorizationDenied(_)));
    assert_eq!(session.state(), AuthState::Unauthenticated);
}
