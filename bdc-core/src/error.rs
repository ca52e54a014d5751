//! Top-level error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::document::DocumentError;
use crate::store::StoreError;

/// Upstream response bodies are cut to this many characters in error messages.
const MAX_BODY_CHARS: usize = 500;

/// Top-level error type for every client operation.
#[derive(Debug, Error)]
pub enum BdcError {
    /// Malformed or missing configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Not logged in, OAuth state mismatch, callback timeout and similar.
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// The token endpoint rejected an authorization-code or refresh-token grant.
    #[error("{grant} failed ({status}): {body}")]
    TokenEndpoint {
        grant: &'static str,
        status: u16,
        body: String,
    },

    /// CSRF token acquisition failed.
    #[error("CSRF error: {message}")]
    Csrf { message: String },

    /// A mutating call was still rejected with 403 after one CSRF refresh.
    #[error("{operation}: HTTP 403 after CSRF token refresh - {body}")]
    CsrfRejected { operation: String, body: String },

    /// Non-2xx response from a resource operation.
    #[error("{operation}: HTTP {status} - {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    /// The service answered 401; the OAuth session has to be re-established.
    #[error("authentication failed (401): OAuth session may need to be re-established via login")]
    SessionExpired,

    /// An upsert could not decide between create and update.
    #[error("{operation}: existence of the object could not be determined: {reason}")]
    ExistenceUnknown { operation: String, reason: String },

    /// A 2xx response whose body could not be interpreted.
    #[error("{operation}: unexpected response body: {message}")]
    InvalidResponse { operation: String, message: String },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Schema document problem (missing key or object, bad structure).
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Token cache problem.
    #[error("token store error: {0}")]
    Store(#[from] StoreError),
}

impl BdcError {
    /// Build an [`Http`](BdcError::Http) error, truncating the body.
    pub(crate) fn http(operation: impl Into<String>, status: u16, body: &str) -> Self {
        Self::Http {
            operation: operation.into(),
            status,
            body: truncate_body(body),
        }
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Upstream HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::TokenEndpoint { status, .. } => Some(*status),
            Self::CsrfRejected { .. } => Some(403),
            Self::SessionExpired => Some(401),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the caller has to log in again before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::TokenEndpoint { .. } | Self::SessionExpired
        )
    }
}

/// Cut a response body to [`MAX_BODY_CHARS`] characters.
pub(crate) fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BdcError>;
