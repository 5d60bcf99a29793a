//! Token refresh against a mock token endpoint

mod common;

use mockito::Matcher;
use solidfit_sync::solid::{AuthState, PodClient};
use solidfit_sync::types::now_millis;
use solidfit_sync::Error;
use std::sync::Arc;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_header("accept", "*/*")
        .match_header("dpop", Matcher::Any)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            Matcher::UrlEncoded("client_id".into(), "abc123".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
        .create_async()
        .await;

    let session = common::signed_in_session(&server).await;
    let before = now_millis();
    let record = assert_ok!(session.refresh().await);

    assert_eq!(record.access_token, "at-2");
    assert_eq!(record.refresh_token, "rt-1");
    assert!(record.token_expires_at >= before + 3_600_000);
    assert!(record.token_expires_at <= now_millis() + 3_600_000);
    assert_eq!(session.state(), AuthState::Valid);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let session = common::signed_in_session(&server).await;
    let (a, b, c) = tokio::join!(
        session.handle_unauthorized("at-1"),
        session.handle_unauthorized("at-1"),
        session.handle_unauthorized("at-1"),
    );

    for record in [a, b, c] {
        assert_eq!(record.unwrap().access_token, "at-2");
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_refresh_failure_logs_out() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let session = common::signed_in_session(&server).await;
    let mut states = session.subscribe();

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, Error::RefreshFailed(_)));
    assert_eq!(*states.borrow_and_update(), AuthState::LoggedOut);

    let record = session.store().snapshot();
    assert!(record.access_token.is_empty());
    assert!(record.refresh_token.is_empty());
    assert!(record.web_id.is_empty());
    assert_eq!(record.token_expires_at, 0);
    assert_eq!(record.client_id, "abc123");
}

#[tokio::test]
async fn test_near_expiry_session_refreshes_before_pod_request() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let resource = server
        .mock("GET", "/pod/data")
        .match_header("authorization", "DPoP at-2")
        .with_status(200)
        .create_async()
        .await;

    // Inside the 60 s skew window.
    let store = common::signed_in_store(&server, now_millis() + 30_000).await;
    let session = Arc::new(solidfit_sync::SolidSession::new(
        solidfit_sync::SolidFitConfig::default(),
        reqwest::Client::new(),
        store,
    ));
    assert!(!session.is_valid());

    let pod = PodClient::new(session);
    assert_ok!(pod.get_turtle(&format!("{}/pod/data", server.url())).await);

    token.assert_async().await;
    resource.assert_async().await;
}

#[tokio::test]
async fn test_second_rejection_surfaces_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/pod/data")
        .with_status(403)
        .expect(2)
        .create_async()
        .await;

    let pod = PodClient::new(common::signed_in_session(&server).await);
    let err = pod
        .get_turtle(&format!("{}/pod/data", server.url()))
        .await
        .unwrap_err();
    assert!(err.is_auth_failure());
}
