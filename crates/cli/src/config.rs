//! Configuration loading.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use piecestash_core::config::AppConfig;
use std::path::Path;

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "PIECESTASH_";

/// Load configuration from an optional TOML file, overridden by environment.
///
/// A missing file is not an error: defaults and environment variables can
/// provide everything.
pub fn load(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}
