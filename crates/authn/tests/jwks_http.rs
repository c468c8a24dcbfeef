//! JWKS endpoint tests using wiremock.
//!
//! These tests wire a [`PermissionGuard`] from configuration, exactly as a
//! deployment would, against a mock identity provider.
#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use drinks_authn::{
    AuthConfig, AuthErrorKind, HttpJwksSource, JwksSource, KeyStoreError, PermissionGuard,
    permissions::{GET_DRINKS_DETAIL, POST_DRINKS},
    testutil::{TEST_AUDIENCE, TestKey, jwks_document, valid_claims},
};
use jsonwebtoken::Algorithm;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const JWKS_PATH: &str = "/.well-known/jwks.json";

fn guard_for(server: &MockServer, fetch_timeout: Duration) -> PermissionGuard {
    let config = AuthConfig::builder()
        .domain("drinks-test.auth0.com")
        .audience(TEST_AUDIENCE)
        .jwks_url(format!("{}{JWKS_PATH}", server.uri()))
        .algorithm(Algorithm::EdDSA)
        .fetch_timeout(fetch_timeout)
        .build()
        .expect("valid config");
    PermissionGuard::from_config(&config).expect("guard")
}

fn bearer(key: &TestKey, permissions: &[&str]) -> String {
    format!("Bearer {}", key.sign(&valid_claims(permissions)))
}

#[tokio::test]
async fn key_set_is_fetched_once_for_many_requests() {
    let server = MockServer::start().await;
    let key = TestKey::generate("provider-key");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(&[&key])))
        .expect(1)
        .mount(&server)
        .await;

    let guard = guard_for(&server, Duration::from_secs(5));
    let header = bearer(&key, &[GET_DRINKS_DETAIL]);

    for _ in 0..5 {
        let decision = guard.authorize(Some(&header), GET_DRINKS_DETAIL).await;
        assert!(decision.is_authorized(), "{decision:?}");
    }
    let denied = guard.authorize(Some(&header), POST_DRINKS).await;
    assert_eq!(denied.failure().map(|e| e.kind()), Some(AuthErrorKind::PermissionNotGranted));
}

#[tokio::test]
async fn server_error_is_unavailable_and_retried() {
    let server = MockServer::start().await;
    let key = TestKey::generate("provider-key");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(&[&key])))
        .mount(&server)
        .await;

    let guard = guard_for(&server, Duration::from_secs(5));
    let header = bearer(&key, &[GET_DRINKS_DETAIL]);

    let first = guard.authorize(Some(&header), GET_DRINKS_DETAIL).await;
    let err = first.failure().expect("provider outage must deny");
    assert_eq!(err.kind(), AuthErrorKind::KeyStoreUnavailable);
    assert_eq!(err.status_code(), 500);

    let second = guard.authorize(Some(&header), GET_DRINKS_DETAIL).await;
    assert!(second.is_authorized(), "failed fetch must not be cached: {second:?}");
}

#[tokio::test]
async fn malformed_document_is_unavailable() {
    let server = MockServer::start().await;
    let key = TestKey::generate("provider-key");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let guard = guard_for(&server, Duration::from_secs(5));
    let decision = guard.authorize(Some(&bearer(&key, &[GET_DRINKS_DETAIL])), GET_DRINKS_DETAIL).await;
    assert_eq!(decision.failure().map(|e| e.kind()), Some(AuthErrorKind::KeyStoreUnavailable));
}

#[tokio::test]
async fn empty_key_list_is_unavailable_not_invalid_key() {
    let server = MockServer::start().await;
    let key = TestKey::generate("provider-key");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
        .mount(&server)
        .await;

    let guard = guard_for(&server, Duration::from_secs(5));
    let decision = guard.authorize(Some(&bearer(&key, &[GET_DRINKS_DETAIL])), GET_DRINKS_DETAIL).await;
    assert_eq!(decision.failure().map(|e| e.kind()), Some(AuthErrorKind::KeyStoreUnavailable));
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    let key = TestKey::generate("provider-key");

    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_document(&[&key]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let guard = guard_for(&server, Duration::from_millis(200));
    let decision = guard.authorize(Some(&bearer(&key, &[GET_DRINKS_DETAIL])), GET_DRINKS_DETAIL).await;
    assert_eq!(decision.failure().map(|e| e.kind()), Some(AuthErrorKind::KeyStoreUnavailable));
}

#[tokio::test]
async fn http_source_reports_status_and_keeps_source_chain() {
    use std::error::Error;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = HttpJwksSource::new(format!("{}{JWKS_PATH}", server.uri()), Duration::from_secs(5))
        .expect("client");
    let err = source.fetch().await.expect_err("404 must fail");
    assert!(
        matches!(&err, KeyStoreError::Unavailable { message, .. } if message.contains("404")),
        "got: {err:?}"
    );

    // Nothing listening: transport error is preserved as the source.
    let closed = HttpJwksSource::new("http://127.0.0.1:9/jwks.json", Duration::from_secs(2))
        .expect("client");
    let err = closed.fetch().await.expect_err("connection must fail");
    assert!(err.source().is_some(), "transport error must be chained: {err:?}");
}
