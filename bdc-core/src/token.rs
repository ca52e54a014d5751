//! OAuth token types.
//!
//! This module provides:
//! - [`OAuthTokenSet`] - The full cached token set for one service host
//! - [`RefreshedToken`] - Result of a refresh-token grant
//! - [`TOKEN_EXPIRY_BUFFER_SECS`] - Safety margin applied to every expiry check

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store::Secret;

/// Seconds before `expires_after` at which a token is already treated as expired.
///
/// Covers clock skew and request latency.
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// Current time as epoch seconds.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// A complete OAuth token set for one service host.
///
/// Carries the token endpoint and client credentials alongside the tokens so a
/// refresh needs nothing else. Serialized with camelCase keys, which is the
/// on-disk token cache format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokenSet {
    /// The bearer token sent on every API call.
    pub access_token: Secret,

    /// Refresh token for the `refresh_token` grant.
    pub refresh_token: Secret,

    /// Epoch seconds after which the access token is no longer valid.
    pub expires_after: i64,

    /// OAuth token endpoint.
    pub token_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: Secret,
}

impl OAuthTokenSet {
    /// Whether the access token expires within `buffer_secs` of now.
    ///
    /// A token is usable only while `expires_after > now + buffer_secs`.
    pub fn expires_within(&self, buffer_secs: i64) -> bool {
        self.expires_after <= now_epoch() + buffer_secs
    }

    /// Whether the access token is still usable under the default buffer.
    pub fn is_fresh(&self) -> bool {
        !self.expires_within(TOKEN_EXPIRY_BUFFER_SECS)
    }

    /// Copy of this set with the access token and expiry replaced.
    ///
    /// Refresh token, token URL and client credentials are kept as-is.
    pub fn with_refreshed(&self, refreshed: RefreshedToken) -> Self {
        Self {
            access_token: refreshed.access_token,
            expires_after: refreshed.expires_after,
            ..self.clone()
        }
    }
}

/// A new access token obtained via the refresh-token grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: Secret,
    pub expires_after: i64,
}
