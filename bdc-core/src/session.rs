//! Authenticated session for one service host.
//!
//! A [`Session`] owns the current [`OAuthTokenSet`] and CSRF session. Both sit
//! behind one async mutex, so at most one refresh or CSRF fetch is in flight
//! per session. The HTTP request itself is sent outside the lock.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use bdc_core::session::Session;
//! use bdc_core::store::FileTokenStore;
//!
//! let store = Arc::new(FileTokenStore::with_default_path()?);
//! let session = Session::new("https://tenant.eu10.hcs.cloud.sap", store);
//!
//! let (token, refreshed) = session.ensure_access_token().await?;
//! println!("token refreshed: {}, value: {}", refreshed, token);
//! # Ok(())
//! # }
//! ```

use reqwest::Response;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, OAuthSource};
use crate::csrf::{fetch_csrf, CsrfSession};
use crate::error::{BdcError, Result};
use crate::oauth::{callback_port, refresh_access_token, AuthorizationCodeFlow, CALLBACK_PORT_ENV};
use crate::pipeline::{build_url, ApiRequest, CSRF_HEADER, OBJECT_CONTENT_TYPE};
use crate::store::{Secret, TokenStore};
use crate::token::{OAuthTokenSet, TOKEN_EXPIRY_BUFFER_SECS};

#[derive(Default)]
struct SessionState {
    tokens: Option<OAuthTokenSet>,
    csrf: Option<CsrfSession>,
}

/// Token and CSRF state for one service host.
pub struct Session {
    host: String,
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    oauth: Option<OAuthSource>,
    callback_port: Option<u16>,
    expiry_buffer: i64,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a session with no tokens loaded yet.
    ///
    /// Tokens are read from `store` on first use.
    pub fn new(host: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            store,
            oauth: None,
            callback_port: None,
            expiry_buffer: TOKEN_EXPIRY_BUFFER_SECS,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Start with a known token set instead of the cached one.
    pub fn with_tokens(self, tokens: OAuthTokenSet) -> Self {
        Self {
            state: Mutex::new(SessionState {
                tokens: Some(tokens),
                csrf: None,
            }),
            ..self
        }
    }

    /// OAuth client credentials used by [`login`](Self::login).
    pub fn with_oauth(mut self, oauth: OAuthSource) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Fixed port for the login redirect listener.
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = Some(port);
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Override the expiry safety margin (seconds).
    pub fn with_expiry_buffer(mut self, secs: i64) -> Self {
        self.expiry_buffer = secs;
        self
    }

    /// Service base URL without trailing slash.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Snapshot of the current token set, if any.
    pub async fn token_set(&self) -> Option<OAuthTokenSet> {
        self.state.lock().await.tokens.clone()
    }

    /// Return a usable access token, refreshing it first if it is about to expire.
    ///
    /// The boolean is `true` when a refresh happened. A refreshed token set is
    /// persisted before it is handed out, and the CSRF session is dropped
    /// because it was bound to the old token.
    pub async fn ensure_access_token(&self) -> Result<(Secret, bool)> {
        let mut state = self.state.lock().await;

        if state.tokens.is_none() {
            state.tokens = self.store.load(&self.host).await?;
        }
        let Some(tokens) = state.tokens.as_ref() else {
            return Err(BdcError::auth("not authenticated: run login first"));
        };

        if !tokens.expires_within(self.expiry_buffer) {
            return Ok((tokens.access_token.clone(), false));
        }

        info!("Access token for {} expired, refreshing...", self.host);
        let refreshed = refresh_access_token(
            &self.http,
            &tokens.token_url,
            &tokens.refresh_token,
            &tokens.client_id,
            &tokens.client_secret,
        )
        .await?;

        let updated = tokens.with_refreshed(refreshed);
        self.store.save(&self.host, &updated).await?;

        let access_token = updated.access_token.clone();
        state.tokens = Some(updated);
        state.csrf = None;
        Ok((access_token, true))
    }

    /// Return the held CSRF session, fetching one if there is none.
    pub async fn ensure_csrf(&self, access_token: &Secret) -> Result<CsrfSession> {
        let mut state = self.state.lock().await;
        if let Some(csrf) = &state.csrf {
            return Ok(csrf.clone());
        }

        debug!("Fetching CSRF token");
        let csrf = fetch_csrf(&self.http, &self.host, access_token).await?;
        state.csrf = Some(csrf.clone());
        Ok(csrf)
    }

    /// Drop the held CSRF session so the next mutating call fetches a new one.
    pub async fn invalidate_csrf(&self) {
        self.state.lock().await.csrf = None;
    }

    /// Send one request with the given credentials. No retries.
    pub(crate) async fn send(
        &self,
        request: &ApiRequest,
        access_token: &Secret,
        csrf: Option<&CsrfSession>,
    ) -> Result<Response> {
        let url = build_url(&self.host, &request.path, &request.params)?;
        debug!("{} {}", request.method, url);

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(access_token.expose())
            .header("X-Requested-With", "XMLHttpRequest");

        if !request.is_mutating() && !request.has_header("accept") {
            builder = builder.header("Accept", OBJECT_CONTENT_TYPE);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(csrf) = csrf {
            builder = builder.header(CSRF_HEADER, csrf.token.expose());
            if !csrf.cookies.is_empty() {
                builder = builder.header("Cookie", csrf.cookies.expose());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        Ok(builder.send().await?)
    }

    /// Establish a working session.
    ///
    /// Tries, in order: the current or cached tokens (validated with a CSRF
    /// fetch), a refresh of those tokens, and finally the interactive
    /// browser flow. Whatever succeeds is persisted and becomes the session
    /// state together with a fresh CSRF session.
    pub async fn login(&self) -> Result<OAuthTokenSet> {
        let mut state = self.state.lock().await;

        let cached = match state.tokens.clone() {
            Some(tokens) => Some(tokens),
            None => self.store.load(&self.host).await?,
        };

        if let Some(tokens) = cached {
            if !tokens.expires_within(self.expiry_buffer) {
                match fetch_csrf(&self.http, &self.host, &tokens.access_token).await {
                    Ok(csrf) => {
                        info!("Using cached tokens for {}", self.host);
                        state.csrf = Some(csrf);
                        state.tokens = Some(tokens.clone());
                        return Ok(tokens);
                    }
                    Err(e) => debug!("Cached token failed CSRF validation: {}", e),
                }
            }

            match refresh_access_token(
                &self.http,
                &tokens.token_url,
                &tokens.refresh_token,
                &tokens.client_id,
                &tokens.client_secret,
            )
            .await
            {
                Ok(refreshed) => {
                    let updated = tokens.with_refreshed(refreshed);
                    self.store.save(&self.host, &updated).await?;
                    state.tokens = Some(updated.clone());
                    state.csrf = None;

                    match fetch_csrf(&self.http, &self.host, &updated.access_token).await {
                        Ok(csrf) => {
                            info!("Refreshed tokens for {}", self.host);
                            state.csrf = Some(csrf);
                            return Ok(updated);
                        }
                        Err(e) => debug!("Refreshed token failed CSRF validation: {}", e),
                    }
                }
                Err(e) => warn!("Token refresh failed, falling back to browser login: {}", e),
            }
        }

        let oauth = self
            .oauth
            .as_ref()
            .ok_or(ConfigError::MissingOAuth)?
            .resolve()?;
        let env_port = std::env::var(CALLBACK_PORT_ENV).ok();
        let port = callback_port(&oauth.client_id, self.callback_port, env_port.as_deref());

        info!("Starting browser login on port {}", port);
        let tokens = AuthorizationCodeFlow::new(oauth, port)
            .run(&self.http)
            .await?;
        self.store.save(&self.host, &tokens).await?;

        let csrf = fetch_csrf(&self.http, &self.host, &tokens.access_token).await?;
        state.tokens = Some(tokens.clone());
        state.csrf = Some(csrf);
        info!("Login successful for {}", self.host);
        Ok(tokens)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("expiry_buffer", &self.expiry_buffer)
            .finish_non_exhaustive()
    }
}
