//! Client configuration.
//!
//! A [`ClientConfig`] names the service host and space and says where OAuth
//! client credentials come from: inline, or an options file in the format
//! the Datasphere CLI uses:
//!
//! ```json
//! {
//!   "client-id": "sb-...",
//!   "client-secret": "...",
//!   "authorization-url": "https://tenant.authentication.eu10.hana.ondemand.com/oauth/authorize",
//!   "token-url": "https://tenant.authentication.eu10.hana.ondemand.com/oauth/token"
//! }
//! ```
//!
//! Configurations can also be read from TOML:
//!
//! ```toml
//! host = "https://tenant.eu10.hcs.cloud.sap"
//! space = "MY_SPACE"
//!
//! [oauth]
//! optionsFile = "./oauth.json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::token::OAuthTokenSet;

/// Error type for configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    /// Login needs OAuth client credentials but none were configured.
    #[error("OAuth configuration required: provide inline credentials or an options file")]
    MissingOAuth,

    /// The OAuth options file does not exist.
    #[error("OAuth options file not found: {}", path.display())]
    OptionsFileNotFound { path: PathBuf },

    /// I/O error reading a configuration file.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The options file is not valid JSON of the expected shape.
    #[error("invalid OAuth options file: {0}")]
    OptionsFile(#[from] serde_json::Error),

    /// The TOML config file could not be parsed.
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// The platform config directory could not be determined.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// OAuth client credentials and endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorization_url: String,
    pub token_url: String,
}

impl OAuthConfig {
    /// Check that every field is present and both URLs parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("oauth.clientId", &self.client_id)?;
        require_non_empty("oauth.clientSecret", &self.client_secret)?;
        require_url("oauth.authorizationUrl", &self.authorization_url)?;
        require_url("oauth.tokenUrl", &self.token_url)?;
        Ok(())
    }

    /// Read credentials from a Datasphere CLI options file.
    pub fn from_options_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::OptionsFileNotFound {
                path: path.to_path_buf(),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: OptionsFile = serde_json::from_str(&raw)?;

        let config = Self {
            client_id: parsed.client_id,
            client_secret: parsed.client_secret,
            authorization_url: parsed.authorization_url,
            token_url: parsed.token_url,
        };
        config.validate()?;
        Ok(config)
    }
}

/// On-disk options file layout (kebab-case keys).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OptionsFile {
    client_id: String,
    client_secret: String,
    authorization_url: String,
    token_url: String,
}

/// Where OAuth client credentials come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OAuthSource {
    /// Credentials given directly.
    Inline(OAuthConfig),

    /// Credentials read from an options file at login time.
    #[serde(rename_all = "camelCase")]
    OptionsFile { options_file: PathBuf },
}

impl OAuthSource {
    /// Produce concrete credentials, reading the options file if needed.
    pub fn resolve(&self) -> Result<OAuthConfig, ConfigError> {
        match self {
            Self::Inline(config) => Ok(config.clone()),
            Self::OptionsFile { options_file } => OAuthConfig::from_options_file(options_file),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Inline(config) => config.validate(),
            Self::OptionsFile { options_file } => {
                if options_file.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid {
                        field: "oauth.optionsFile",
                        message: "must not be empty".to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// Configuration for a [`BdcClient`](crate::BdcClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Service base URL, e.g. `https://tenant.eu10.hcs.cloud.sap`.
    pub host: String,

    /// Space that owns the managed objects.
    pub space: String,

    /// OAuth client credentials, needed for interactive login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSource>,

    /// Pre-supplied tokens. When set, no login is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokenSet>,

    /// Local port for the OAuth redirect listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,

    /// Token cache file. Defaults to `~/.catalyst-bdc/tokens.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cache: Option<PathBuf>,
}

impl ClientConfig {
    /// Create a configuration for a host and space.
    pub fn new(host: impl Into<String>, space: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            space: space.into(),
            oauth: None,
            tokens: None,
            callback_port: None,
            token_cache: None,
        }
    }

    /// Set the OAuth credential source.
    pub fn with_oauth(mut self, oauth: OAuthSource) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Start with the given tokens instead of logging in.
    pub fn with_tokens(mut self, tokens: OAuthTokenSet) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Override the OAuth redirect listener port.
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = Some(port);
        self
    }

    /// Override the token cache location.
    pub fn with_token_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_cache = Some(path.into());
        self
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = require_url("host", &self.host)?;
        if url.host_str().is_none() {
            return Err(ConfigError::Invalid {
                field: "host",
                message: "URL has no hostname".to_string(),
            });
        }
        require_non_empty("space", &self.space)?;

        if let Some(oauth) = &self.oauth {
            oauth.validate()?;
        }
        Ok(())
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Platform config file location, e.g. `~/.config/catalyst-bdc/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("com", "catalyst", "catalyst-bdc")
            .ok_or(ConfigError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn require_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        field,
        message: format!("{value:?} is not a valid URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            field,
            message: format!("unsupported URL scheme {other:?}"),
        }),
    }
}
