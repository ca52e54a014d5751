//! Building a [`ClientConfig`] from the config file and command-line flags.
//!
//! Precedence: flags, then `--config`, then the platform config file if it
//! exists.

use anyhow::{bail, Context, Result};
use bdc_core::{ClientConfig, OAuthSource};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Connection flags shared by every subcommand.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub space: Option<String>,
    pub oauth_file: Option<PathBuf>,
}

/// Resolve the effective configuration.
pub fn load(overrides: &Overrides) -> Result<ClientConfig> {
    let file = match &overrides.config {
        Some(path) => Some(read_file(path)?),
        None => match ClientConfig::default_path() {
            Ok(path) if path.exists() => Some(read_file(&path)?),
            _ => None,
        },
    };

    merge(file, overrides)
}

fn read_file(path: &Path) -> Result<ClientConfig> {
    debug!("Loading config from {}", path.display());
    ClientConfig::from_toml_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

fn merge(file: Option<ClientConfig>, overrides: &Overrides) -> Result<ClientConfig> {
    let mut config = match (file, &overrides.host, &overrides.space) {
        (Some(config), _, _) => config,
        (None, Some(host), Some(space)) => ClientConfig::new(host.clone(), space.clone()),
        (None, _, _) => bail!(
            "no configuration found: pass --host and --space, or --config <file>"
        ),
    };

    if let Some(host) = &overrides.host {
        config.host = host.clone();
    }
    if let Some(space) = &overrides.space {
        config.space = space.clone();
    }
    if let Some(options_file) = &overrides.oauth_file {
        config.oauth = Some(OAuthSource::OptionsFile {
            options_file: options_file.clone(),
        });
    }

    Ok(config)
}
