//! Interactive authorization-code flow.
//!
//! # Flow Overview
//!
//! 1. Generate a random state nonce
//! 2. Bind a listener on `localhost` at the callback port
//! 3. Open the browser at the authorization URL
//! 4. Wait (at most five minutes) for the redirect carrying `code` and `state`
//! 5. Exchange the code for tokens at the token endpoint
//!
//! The listener is owned by the flow call, so it is closed exactly once on
//! every exit path.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use bdc_core::config::OAuthConfig;
//! use bdc_core::oauth::AuthorizationCodeFlow;
//!
//! let config = OAuthConfig {
//!     client_id: "sb-client".to_string(),
//!     client_secret: "secret".to_string(),
//!     authorization_url: "https://auth.example.com/oauth/authorize".to_string(),
//!     token_url: "https://auth.example.com/oauth/token".to_string(),
//! };
//!
//! let flow = AuthorizationCodeFlow::new(config, 8080);
//! let tokens = flow.run(&reqwest::Client::new()).await?;
//! println!("logged in, token expires at {}", tokens.expires_after);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{authorization_url, generate_state, open_browser, request_token};
use crate::config::OAuthConfig;
use crate::error::{BdcError, Result};
use crate::store::Secret;
use crate::token::OAuthTokenSet;

/// How long to wait for the browser redirect.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const SUCCESS_PAGE: &str =
    "<html><body><h2>Login successful</h2><p>You can close this tab.</p></body></html>";

/// Authorization-code flow against one OAuth client.
pub struct AuthorizationCodeFlow {
    config: OAuthConfig,
    port: u16,
    timeout: Duration,
    launch_browser: bool,
}

impl AuthorizationCodeFlow {
    /// Create a flow listening on `port` for the redirect.
    pub fn new(config: OAuthConfig, port: u16) -> Self {
        Self {
            config,
            port,
            timeout: LOGIN_TIMEOUT,
            launch_browser: true,
        }
    }

    /// Override the callback timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Only log the authorization URL instead of opening a browser.
    pub fn without_browser(mut self) -> Self {
        self.launch_browser = false;
        self
    }

    /// Redirect URI registered for the client.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Bind the callback listener on the host named in the redirect URI.
    ///
    /// `localhost` is resolved and the first address that binds wins, so the
    /// listener sits on whichever loopback family the redirect resolves to.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(("localhost", self.port)).await.map_err(|e| {
            BdcError::auth(format!(
                "failed to start OAuth callback server on port {}: {}",
                self.port, e
            ))
        })
    }

    /// Run the whole flow: bind, open browser, wait for the code, exchange it.
    pub async fn run(&self, http: &reqwest::Client) -> Result<OAuthTokenSet> {
        let listener = self.bind().await?;
        let state = generate_state();
        self.complete(http, listener, &state).await
    }

    /// Run the flow on an already bound listener with a known state nonce.
    pub async fn complete(
        &self,
        http: &reqwest::Client,
        listener: TcpListener,
        state: &str,
    ) -> Result<OAuthTokenSet> {
        let url = authorization_url(&self.config.authorization_url, &self.config.client_id, state)?;

        info!("Open this URL to log in: {}", url);
        debug!("Redirect URI: {}", self.redirect_uri());
        if self.launch_browser {
            open_browser(&url);
        }

        let (code, mut socket) =
            match tokio::time::timeout(self.timeout, wait_for_code(&listener, state)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(BdcError::auth(format!(
                        "OAuth login timed out. Did you maintain the redirect URI as {} in SAP Datasphere?",
                        self.redirect_uri()
                    )));
                }
            };
        drop(listener);

        let result = self.exchange_code(http, &code).await;
        match &result {
            Ok(_) => reply(&mut socket, "200 OK", SUCCESS_PAGE).await,
            Err(_) => reply(&mut socket, "500 Internal Server Error", "Token exchange failed").await,
        }

        result
    }

    /// Exchange an authorization code for a token set.
    pub async fn exchange_code(&self, http: &reqwest::Client, code: &str) -> Result<OAuthTokenSet> {
        debug!("Exchanging authorization code for tokens...");

        let redirect_uri = self.redirect_uri();
        let response = request_token(
            http,
            &self.config.token_url,
            "token exchange",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &redirect_uri),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ],
        )
        .await?;

        let expires_after = response.expires_after();
        let refresh_token = response.refresh_token.ok_or_else(|| BdcError::InvalidResponse {
            operation: "token exchange".to_string(),
            message: "token response has no refresh_token".to_string(),
        })?;

        Ok(OAuthTokenSet {
            access_token: Secret::new(response.access_token),
            refresh_token: Secret::new(refresh_token),
            expires_after,
            token_url: self.config.token_url.clone(),
            client_id: self.config.client_id.clone(),
            client_secret: Secret::new(self.config.client_secret.clone()),
        })
    }
}

/// Accept connections until one carries a usable authorization code.
///
/// Requests without a `code` (favicon fetches and the like) get a 400 and
/// the wait continues. An `error` parameter or a state mismatch ends the
/// wait with an error. On success the connection is handed back unanswered.
async fn wait_for_code(listener: &TcpListener, expected_state: &str) -> Result<(String, TcpStream)> {
    loop {
        let (mut socket, _) = listener
            .accept()
            .await
            .map_err(|e| BdcError::auth(format!("failed to accept connection: {}", e)))?;

        let mut buffer = [0; 8192];
        let n = socket
            .read(&mut buffer)
            .await
            .map_err(|e| BdcError::auth(format!("failed to read request: {}", e)))?;

        let request = String::from_utf8_lossy(&buffer[..n]);
        let params = parse_callback_params(&request);

        if let Some(error) = params.get("error") {
            reply(&mut socket, "400 Bad Request", "Authorization failed").await;
            return Err(BdcError::auth(format!(
                "authorization server returned error: {}",
                error
            )));
        }

        let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
            reply(&mut socket, "400 Bad Request", "Missing authorization code").await;
            continue;
        };

        if params.get("state").map(String::as_str) != Some(expected_state) {
            reply(&mut socket, "400 Bad Request", "Invalid callback - state mismatch").await;
            return Err(BdcError::auth("OAuth callback: state mismatch"));
        }

        return Ok((code.clone(), socket));
    }
}

/// Query parameters of the request line of a raw HTTP request.
fn parse_callback_params(request: &str) -> HashMap<String, String> {
    let Some(target) = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
    else {
        return HashMap::new();
    };

    url::Url::parse(&format!("http://localhost{}", target))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

/// Answer the browser; a failed write is logged and otherwise ignored.
async fn reply(socket: &mut TcpStream, status: &str, body: &str) {
    if let Err(e) = respond(socket, status, body).await {
        warn!("Failed to answer OAuth callback ({}): {}", status, e);
    }
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}
