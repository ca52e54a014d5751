//! Refresh-token grant.

use tracing::debug;

use super::request_token;
use crate::error::Result;
use crate::store::Secret;
use crate::token::RefreshedToken;

/// Exchange a refresh token for a new access token.
///
/// A single network call, never retried here. On a non-2xx answer the error
/// carries the upstream status and body.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    refresh_token: &Secret,
    client_id: &str,
    client_secret: &Secret,
) -> Result<RefreshedToken> {
    debug!("Refreshing access token...");

    let response = request_token(
        http,
        token_url,
        "token refresh",
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose()),
            ("client_id", client_id),
            ("client_secret", client_secret.expose()),
        ],
    )
    .await?;

    debug!("Token refreshed, expires in {} seconds", response.expires_in);

    Ok(RefreshedToken {
        expires_after: response.expires_after(),
        access_token: Secret::new(response.access_token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BdcError;
    use crate::token::now_epoch;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .and(body_string_contains("client_id=sb-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refreshed = refresh_access_token(
            &reqwest::Client::new(),
            &format!("{}/oauth/token", server.uri()),
            &Secret::new("old-refresh"),
            "sb-client",
            &Secret::new("secret"),
        )
        .await
        .unwrap();

        assert_eq!(refreshed.access_token.expose(), "new-access");
        let expected = now_epoch() + 3600;
        assert!((refreshed.expires_after - expected).abs() <= 5);
    }

    #[tokio::test]
    async fn test_refresh_failure_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_token"}"#),
            )
            .mount(&server)
            .await;

        let err = refresh_access_token(
            &reqwest::Client::new(),
            &format!("{}/oauth/token", server.uri()),
            &Secret::new("revoked"),
            "sb-client",
            &Secret::new("secret"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(401));
        match &err {
            BdcError::TokenEndpoint { body, .. } => assert!(body.contains("invalid_token")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("token refresh failed (401)"));
    }
}
