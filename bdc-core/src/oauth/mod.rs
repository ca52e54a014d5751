//! OAuth 2.0 client side.
//!
//! This module provides:
//! - [`login`] - Interactive authorization-code flow with a local callback listener
//! - [`refresh`] - Non-interactive refresh-token grant
//!
//! plus the helpers both share: authorization URL construction, state
//! nonces, callback port selection and the token endpoint call.

pub mod login;
pub mod refresh;

pub use login::AuthorizationCodeFlow;
pub use refresh::refresh_access_token;

use oauth2::{basic::BasicClient, AuthUrl, ClientId, CsrfToken};
use serde::Deserialize;
use tracing::debug;

use crate::error::{BdcError, Result};
use crate::token::now_epoch;

/// Environment variable that overrides the callback port.
pub const CALLBACK_PORT_ENV: &str = "CLI_HTTP_PORT";

/// Callback port for custom (`sb-` prefixed) OAuth clients.
pub const CUSTOM_CLIENT_PORT: u16 = 8080;

/// Callback port for pre-delivered OAuth clients.
pub const PREDELIVERED_CLIENT_PORT: u16 = 65000;

/// Build the authorization URL the browser is sent to.
///
/// Carries exactly `response_type=code`, `client_id` and `state`; the redirect
/// URI is the one registered for the client on the authorization server.
pub fn authorization_url(authorization_url: &str, client_id: &str, state: &str) -> Result<String> {
    let auth_url = AuthUrl::new(authorization_url.to_string())
        .map_err(|e| BdcError::auth(format!("invalid authorization URL: {}", e)))?;

    let client = BasicClient::new(ClientId::new(client_id.to_string()), None, auth_url, None);
    let (url, _state) = client
        .authorize_url(|| CsrfToken::new(state.to_string()))
        .url();

    Ok(url.to_string())
}

/// Generate a random hex state nonce (128 bits).
pub fn generate_state() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Pick the local callback port.
///
/// An explicit override wins, then the `CLI_HTTP_PORT` value if it parses,
/// then the client naming convention: `sb-` prefixed client IDs are custom
/// clients registered with port 8080, everything else is a pre-delivered
/// client on port 65000.
pub fn callback_port(client_id: &str, override_port: Option<u16>, env_port: Option<&str>) -> u16 {
    if let Some(port) = override_port {
        return port;
    }
    if let Some(port) = env_port.and_then(|p| p.trim().parse().ok()) {
        return port;
    }
    if client_id.starts_with("sb-") {
        CUSTOM_CLIENT_PORT
    } else {
        PREDELIVERED_CLIENT_PORT
    }
}

/// Best-effort launch of the system browser.
///
/// Failure is only logged; the URL is also printed by the caller.
pub fn open_browser(url: &str) {
    let result = if cfg!(target_os = "windows") {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).spawn()
    } else {
        std::process::Command::new("xdg-open").arg(url).spawn()
    };

    if let Err(e) = result {
        debug!("Failed to open browser: {}", e);
    }
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenEndpointResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl TokenEndpointResponse {
    /// Absolute expiry in epoch seconds.
    pub fn expires_after(&self) -> i64 {
        now_epoch() + self.expires_in
    }
}

/// POST a form-encoded grant to the token endpoint.
///
/// Non-2xx responses become [`BdcError::TokenEndpoint`] with the status and body.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    grant: &'static str,
    form: &[(&str, &str)],
) -> Result<TokenEndpointResponse> {
    let response = http.post(token_url).form(form).send().await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(BdcError::TokenEndpoint {
            grant,
            status: status.as_u16(),
            body: crate::error::truncate_body(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| BdcError::InvalidResponse {
        operation: grant.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_url_params() {
        let url = authorization_url(
            "https://auth.example.com/oauth/authorize",
            "sb-client!t1",
            "abc123",
        )
        .unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(url.starts_with("https://auth.example.com/oauth/authorize?"));
        assert_eq!(
            pairs,
            vec![
                ("response_type".to_string(), "code".to_string()),
                ("client_id".to_string(), "sb-client!t1".to_string()),
                ("state".to_string(), "abc123".to_string()),
            ]
        );
    }

    #[test]
    fn test_authorization_url_invalid() {
        assert!(authorization_url("not a url", "c", "s").is_err());
    }

    #[test]
    fn test_generate_state() {
        let s1 = generate_state();
        let s2 = generate_state();
        assert_eq!(s1.len(), 32);
        assert_ne!(s1, s2);
        assert!(s1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_callback_port_selection() {
        assert_eq!(callback_port("sb-custom", None, None), CUSTOM_CLIENT_PORT);
        assert_eq!(callback_port("predelivered", None, None), PREDELIVERED_CLIENT_PORT);
        assert_eq!(callback_port("sb-custom", None, Some("9000")), 9000);
        assert_eq!(callback_port("sb-custom", None, Some("junk")), CUSTOM_CLIENT_PORT);
        assert_eq!(callback_port("sb-custom", Some(1234), Some("9000")), 1234);
    }
}
