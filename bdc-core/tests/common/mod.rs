//! Shared helpers for the integration tests.

#![allow(dead_code)]

use bdc_core::token::now_epoch;
use bdc_core::{MemoryTokenStore, OAuthTokenSet, Secret, Session};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SPACE: &str = "TEST_SPACE";

/// Token set whose token endpoint is the mock server.
pub fn token_set(server: &MockServer, access_token: &str, expires_in: i64) -> OAuthTokenSet {
    OAuthTokenSet {
        access_token: Secret::new(access_token),
        refresh_token: Secret::new("refresh-1"),
        expires_after: now_epoch() + expires_in,
        token_url: format!("{}/oauth/token", server.uri()),
        client_id: "sb-test-client".to_string(),
        client_secret: Secret::new("client-secret"),
    }
}

/// Session whose store is seeded with `tokens` for the mock server host.
pub fn session_with_store(
    server: &MockServer,
    tokens: OAuthTokenSet,
) -> (Session, Arc<MemoryTokenStore>) {
    let store = Arc::new(MemoryTokenStore::with_tokens(&server.uri(), tokens).unwrap());
    let session = Session::new(server.uri(), store.clone());
    (session, store)
}

/// Mount a CSRF endpoint that hands out `token` (at most `times` times if given).
pub async fn mount_csrf(server: &MockServer, token: &str, times: Option<u64>, priority: u8) {
    let mut mock = Mock::given(method("HEAD"))
        .and(path("/api/v1/csrf"))
        .and(header("X-Csrf-Token", "Fetch"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-csrf-token", token)
                .insert_header("set-cookie", "JSESSIONID=s1; Path=/; HttpOnly"),
        )
        .with_priority(priority);
    if let Some(n) = times {
        mock = mock.up_to_n_times(n);
    }
    mock.mount(server).await;
}

/// Mount a refresh-token grant returning `access_token`.
pub async fn mount_refresh(server: &MockServer, access_token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(wiremock::matchers::body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub fn objects_path(endpoint: &str) -> String {
    format!("/dwaas-core/api/v1/spaces/{}/{}", SPACE, endpoint)
}

pub fn object_path(endpoint: &str, name: &str) -> String {
    format!("{}/{}", objects_path(endpoint), name)
}

pub const TABLE_DOCUMENT: &str = r#"{
  "definitions": {
    "ZTEST_001": {
      "kind": "entity",
      "elements": { "ID": { "type": "cds.Integer", "key": true } }
    }
  },
  "version": { "csn": "1.0" },
  "meta": { "creator": "integration-test" },
  "$version": "1.0"
}"#;

pub const REPLICATION_FLOW_DOCUMENT: &str = r#"{
  "definitions": {
    "T_ORDERS": { "kind": "entity", "elements": {} },
    "T_CUSTOMERS": { "kind": "entity", "elements": {} }
  },
  "replicationflows": {
    "RF_SALES": {
      "kind": "sap.dis.replicationflow",
      "targets": {
        "T_ORDERS": { "source": "ORDERS" },
        "T_CUSTOMERS": { "source": "CUSTOMERS" }
      }
    }
  },
  "version": { "csn": "1.0" },
  "meta": { "creator": "integration-test" }
}"#;

pub const VIEW_DOCUMENT: &str = r#"{
  "definitions": {
    "V_SALES": {
      "kind": "entity",
      "@EndUserText.label": "Sales",
      "query": { "SELECT": { "from": { "ref": ["T_ORDERS"] } } }
    }
  },
  "version": { "csn": "1.0" },
  "meta": { "creator": "integration-test" }
}"#;
