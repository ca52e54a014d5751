//! Authenticated request pipeline.
//!
//! Every call to the service goes through a [`Requestor`]. The session
//! implementation attaches the bearer token to every request and, for
//! mutating methods, the CSRF token and session cookies. A mutating call
//! rejected with 403 gets exactly one fresh CSRF token and exactly one retry.

use async_trait::async_trait;
use reqwest::{Method, Response};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{BdcError, Result};
use crate::session::Session;

/// Header carrying the CSRF token.
pub const CSRF_HEADER: &str = "X-Csrf-Token";

/// `Accept` value the object API needs on reads.
pub const OBJECT_CONTENT_TYPE: &str = "application/vnd.sap.datasphere.object.content+json";

/// A request relative to the service host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ApiRequest {
    /// Create a request with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body and the matching `Content-Type`.
    pub fn json_body(self, body: impl Into<String>) -> Self {
        let mut request = self.header("Content-Type", "application/json");
        request.body = Some(body.into());
        request
    }

    /// Whether the method changes server state and therefore needs CSRF.
    pub fn is_mutating(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD)
    }

    /// Whether the caller already set a header (case-insensitive).
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Short description for log and error messages.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Sends [`ApiRequest`]s with whatever authentication the implementation owns.
#[async_trait]
pub trait Requestor: Send + Sync {
    /// Send a request and return the raw response.
    ///
    /// Non-2xx responses are returned as `Ok`; interpreting the status is up
    /// to the caller (see [`check_response`]). The exception is a mutating
    /// call that is still rejected with 403 after a CSRF refresh.
    async fn request(&self, request: ApiRequest) -> Result<Response>;
}

#[async_trait]
impl<T: Requestor + ?Sized> Requestor for Arc<T> {
    async fn request(&self, request: ApiRequest) -> Result<Response> {
        (**self).request(request).await
    }
}

#[async_trait]
impl Requestor for Session {
    async fn request(&self, request: ApiRequest) -> Result<Response> {
        let (access_token, refreshed) = self.ensure_access_token().await?;
        if refreshed {
            debug!("Access token was refreshed before {}", request.describe());
        }

        if !request.is_mutating() {
            return self.send(&request, &access_token, None).await;
        }

        let csrf = self.ensure_csrf(&access_token).await?;
        let response = self.send(&request, &access_token, Some(&csrf)).await?;
        if response.status() != reqwest::StatusCode::FORBIDDEN {
            return Ok(response);
        }

        debug!(
            "Got 403 for {}, retrying once with a fresh CSRF token",
            request.describe()
        );
        self.invalidate_csrf().await;
        let fresh = self.ensure_csrf(&access_token).await?;
        let retry = self.send(&request, &access_token, Some(&fresh)).await?;

        if retry.status() == reqwest::StatusCode::FORBIDDEN {
            let body = retry.text().await.unwrap_or_default();
            return Err(BdcError::CsrfRejected {
                operation: request.describe(),
                body: crate::error::truncate_body(&body),
            });
        }
        Ok(retry)
    }
}

/// Join `path` onto `host` and append query parameters.
///
/// Trailing slashes on the host are ignored.
pub fn build_url(host: &str, path: &str, params: &[(String, String)]) -> Result<Url> {
    let base = Url::parse(host.trim_end_matches('/')).map_err(|e| {
        BdcError::Config(crate::config::ConfigError::Invalid {
            field: "host",
            message: e.to_string(),
        })
    })?;
    let mut url = base.join(path).map_err(|e| {
        BdcError::Config(crate::config::ConfigError::Invalid {
            field: "path",
            message: format!("{path:?}: {e}"),
        })
    })?;

    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Percent-encode one path segment.
///
/// Everything except ASCII alphanumerics and `*-._` is escaped, so `/`, `?`
/// and `#` in an object name stay inside its segment.
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .map(|part| if part == "+" { "%20" } else { part })
        .collect()
}

/// Read the body of a response, turning non-2xx into [`BdcError::Http`].
pub async fn check_response(response: Response, operation: &str) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(BdcError::http(operation, status.as_u16(), &body));
    }
    Ok(body)
}
