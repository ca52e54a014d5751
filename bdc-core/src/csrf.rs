//! CSRF token acquisition.
//!
//! The service binds a one-time anti-CSRF token to the authenticated
//! session. It is fetched with `HEAD /api/v1/csrf` and `X-Csrf-Token: Fetch`,
//! and comes back in the `x-csrf-token` response header together with the
//! session cookies that must accompany it.

use reqwest::header::SET_COOKIE;
use tracing::debug;

use crate::error::{BdcError, Result};
use crate::pipeline::{build_url, CSRF_HEADER};
use crate::store::Secret;

/// CSRF endpoint path.
pub const CSRF_PATH: &str = "/api/v1/csrf";

/// A CSRF token and the cookie header it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfSession {
    pub token: Secret,
    pub cookies: Secret,
}

/// Fetch a fresh CSRF token for an access token.
pub async fn fetch_csrf(
    http: &reqwest::Client,
    host: &str,
    access_token: &Secret,
) -> Result<CsrfSession> {
    let url = build_url(host, CSRF_PATH, &[])?;

    let response = http
        .head(url)
        .bearer_auth(access_token.expose())
        .header(CSRF_HEADER, "Fetch")
        .header("X-Requested-With", "XMLHttpRequest")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(BdcError::Csrf {
            message: format!("CSRF fetch failed ({})", status.as_u16()),
        });
    }

    let token = response
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BdcError::Csrf {
            message: "no x-csrf-token header in CSRF response".to_string(),
        })?
        .to_string();

    let cookies = cookie_header(response.headers());
    debug!(
        "CSRF token acquired, cookies: {}",
        if cookies.is_empty() { "none" } else { "present" }
    );

    Ok(CsrfSession {
        token: Secret::new(token),
        cookies: Secret::new(cookies),
    })
}

/// Collapse `Set-Cookie` headers into a single `Cookie` header value.
///
/// Only the `name=value` part of each cookie is kept.
fn cookie_header(headers: &reqwest::header::HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|c| c.split(';').next())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}
