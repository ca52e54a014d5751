//! Integration tests for the session engine.
//!
//! These tests verify that the session:
//! - Refreshes expired tokens and leaves fresh ones alone
//! - Persists refreshed tokens
//! - Drops the CSRF session after a refresh
//! - Retries a 403'd mutating call exactly once with a new CSRF token
//! - Reuses or refreshes cached tokens on login

mod common;

use bdc_core::{ApiRequest, BdcError, FileTokenStore, Requestor, Secret, Session, TokenStore};
use common::{mount_csrf, mount_refresh, session_with_store, token_set};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_expired_token_triggers_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, "access-2", 1).await;

    let (session, store) = session_with_store(&server, token_set(&server, "access-1", -1));

    let (token, refreshed) = session.ensure_access_token().await.unwrap();
    assert!(refreshed);
    assert_eq!(token.expose(), "access-2");

    let persisted = store.load(&server.uri()).await.unwrap().unwrap();
    assert_eq!(persisted.access_token.expose(), "access-2");
    assert_eq!(persisted.refresh_token.expose(), "refresh-1");
    assert!(persisted.is_fresh());
}

#[tokio::test]
async fn test_fresh_token_is_not_refreshed() {
    let server = MockServer::start().await;
    mount_refresh(&server, "unused", 0).await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));

    let (token, refreshed) = session.ensure_access_token().await.unwrap();
    assert!(!refreshed);
    assert_eq!(token.expose(), "access-1");
}

#[tokio::test]
async fn test_token_inside_expiry_buffer_is_refreshed() {
    let server = MockServer::start().await;
    mount_refresh(&server, "access-2", 1).await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 30));

    let (_, refreshed) = session.ensure_access_token().await.unwrap();
    assert!(refreshed);
}

#[tokio::test]
async fn test_refresh_failure_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = session_with_store(&server, token_set(&server, "access-1", -1));

    let err = session.ensure_access_token().await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(err.requires_login());

    let persisted = store.load(&server.uri()).await.unwrap().unwrap();
    assert_eq!(persisted.access_token.expose(), "access-1");
}

#[tokio::test]
async fn test_no_tokens_requires_login() {
    let server = MockServer::start().await;
    let session = Session::new(server.uri(), Arc::new(bdc_core::MemoryTokenStore::new()));

    let err = session.ensure_access_token().await.unwrap_err();
    assert!(matches!(err, BdcError::Auth { .. }));
    assert!(err.requires_login());
}

#[tokio::test]
async fn test_refreshed_token_persisted_to_file() {
    let server = MockServer::start().await;
    mount_refresh(&server, "access-2", 1).await;

    let temp = tempfile::TempDir::new().unwrap();
    let cache = temp.path().join("tokens.json");
    let store = Arc::new(FileTokenStore::new(&cache));
    store
        .save(&server.uri(), &token_set(&server, "access-1", -1))
        .await
        .unwrap();

    let session = Session::new(server.uri(), store);
    session.ensure_access_token().await.unwrap();

    let reopened = FileTokenStore::new(&cache);
    let persisted = reopened.load(&server.uri()).await.unwrap().unwrap();
    assert_eq!(persisted.access_token.expose(), "access-2");
}

#[tokio::test]
async fn test_refresh_invalidates_csrf_session() {
    let server = MockServer::start().await;
    mount_refresh(&server, "access-2", 1).await;

    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf-old"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf-new"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/widgets"))
        .and(header("X-Csrf-Token", "csrf-new"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::new(server.uri(), Arc::new(bdc_core::MemoryTokenStore::new()))
        .with_tokens(token_set(&server, "access-1", -1));

    let old = session.ensure_csrf(&Secret::new("access-1")).await.unwrap();
    assert_eq!(old.token.expose(), "csrf-old");

    let response = session.request(ApiRequest::post("/widgets")).await.unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_get_sends_no_csrf_header() {
    let server = MockServer::start().await;
    mount_csrf(&server, "unused", None, 1).await;

    Mock::given(method("GET"))
        .and(path("/widgets/1"))
        .and(header("Authorization", "Bearer access-1"))
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .and(header(
            "Accept",
            "application/vnd.sap.datasphere.object.content+json",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));
    let response = session.request(ApiRequest::get("/widgets/1")).await.unwrap();
    assert_eq!(response.status(), 200);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("x-csrf-token").is_none());
}

#[tokio::test]
async fn test_csrf_reused_across_mutating_calls() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-csrf-token", "csrf-1")
                .insert_header("set-cookie", "JSESSIONID=s1; Path=/; HttpOnly"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/widgets/1"))
        .and(header("X-Csrf-Token", "csrf-1"))
        .and(header("Cookie", "JSESSIONID=s1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));
    for _ in 0..2 {
        let response = session.request(ApiRequest::put("/widgets/1")).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn test_403_retries_once_with_fresh_csrf() {
    let server = MockServer::start().await;
    mount_csrf(&server, "csrf-1", Some(1), 1).await;
    mount_csrf(&server, "csrf-2", None, 2).await;

    Mock::given(method("POST"))
        .and(path("/widgets"))
        .and(header("X-Csrf-Token", "csrf-1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("CSRF token validation failed"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/widgets"))
        .and(header("X-Csrf-Token", "csrf-2"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));
    let response = session
        .request(ApiRequest::post("/widgets").json_body("{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let csrf_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "HEAD")
        .count();
    assert_eq!(csrf_fetches, 2);
}

#[tokio::test]
async fn test_second_403_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/widgets/1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(2)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));
    let err = session
        .request(ApiRequest::delete("/widgets/1"))
        .await
        .unwrap_err();

    assert!(matches!(err, BdcError::CsrfRejected { .. }));
    assert_eq!(err.status(), Some(403));
    assert!(err.to_string().contains("forbidden"));
}

#[tokio::test]
async fn test_non_403_failures_are_not_retried() {
    let server = MockServer::start().await;
    mount_csrf(&server, "csrf", None, 1).await;
    Mock::given(method("POST"))
        .and(path("/widgets"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));
    let response = session.request(ApiRequest::post("/widgets")).await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_csrf_fetch_failure_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "access-1", 3600));
    let err = session.request(ApiRequest::post("/widgets")).await.unwrap_err();

    assert!(matches!(err, BdcError::Csrf { .. }));
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_login_reuses_valid_cached_tokens() {
    let server = MockServer::start().await;
    mount_refresh(&server, "unused", 0).await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("Authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/widgets"))
        .and(header("X-Csrf-Token", "csrf"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "cached", 3600));
    let tokens = session.login().await.unwrap();
    assert_eq!(tokens.access_token.expose(), "cached");

    // the CSRF session from login is reused
    let response = session.request(ApiRequest::post("/widgets")).await.unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_login_refreshes_expired_cached_tokens() {
    let server = MockServer::start().await;
    mount_refresh(&server, "access-2", 1).await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf"))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = session_with_store(&server, token_set(&server, "access-1", -1));
    let tokens = session.login().await.unwrap();

    assert_eq!(tokens.access_token.expose(), "access-2");
    let persisted = store.load(&server.uri()).await.unwrap().unwrap();
    assert_eq!(persisted.access_token.expose(), "access-2");
}

#[tokio::test]
async fn test_login_refreshes_when_cached_token_is_rejected() {
    let server = MockServer::start().await;
    mount_refresh(&server, "access-2", 1).await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("Authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf"))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _store) = session_with_store(&server, token_set(&server, "revoked", 3600));
    let tokens = session.login().await.unwrap();
    assert_eq!(tokens.access_token.expose(), "access-2");
}

#[tokio::test]
async fn test_login_without_tokens_or_oauth_config_fails() {
    let server = MockServer::start().await;
    let session = Session::new(server.uri(), Arc::new(bdc_core::MemoryTokenStore::new()));

    let err = session.login().await.unwrap_err();
    assert!(matches!(
        err,
        BdcError::Config(bdc_core::ConfigError::MissingOAuth)
    ));
}
