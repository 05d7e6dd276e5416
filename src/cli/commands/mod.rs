//! CLI command implementations.

pub mod config;
pub mod plan;
pub mod simulate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Read and parse a YAML document.
pub(crate) async fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Effective configuration: an explicit file, or the project hierarchy.
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
