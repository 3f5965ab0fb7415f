// av_runtime/src/settings.rs

//! Configuration loading: built-in defaults with a TOML mission file merged
//! on top. An invalid configuration is fatal before any task is spawned.

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;

use av_core::config::Config;
use av_core::errors::AvError;

pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    let config: Config = figment
        .extract()
        .context("failed to read mission configuration")?;
    config
        .validate()
        .map_err(AvError::from)
        .context("refusing to arm")?;
    Ok(config)
}
