//! Implementation of the `config` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::load_config;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file instead of the `.sqlproxy/` hierarchy
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    pub config: Config,
}

impl ConfigOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let c = &self.config;
        vec![
            ("requeue_interval_ms", c.requeue_interval_ms.to_string()),
            ("suspend_enabled", c.suspend_enabled.to_string()),
            ("log_proxy_diffs", c.log_proxy_diffs.to_string()),
            ("max_concurrent_reconciles", c.max_concurrent_reconciles.to_string()),
            ("images.proxy", c.images.proxy.clone()),
            ("images.exporter", c.images.exporter.clone()),
            ("logging.level", c.logging.level.clone()),
            ("logging.format", c.logging.format.clone()),
            (
                "logging.log_dir",
                c.logging.log_dir.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("logging.rotation", c.logging.rotation.clone()),
            ("retry.max_retries", c.retry.max_retries.to_string()),
            ("retry.initial_backoff_ms", c.retry.initial_backoff_ms.to_string()),
            ("retry.max_backoff_ms", c.retry.max_backoff_ms.to_string()),
        ]
    }
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["key", "value"]);
        for (key, value) in self.rows() {
            table.add_row(vec![key.to_string(), value]);
        }
        format!("Effective configuration:\n{table}")
    }
}

pub async fn execute(args: ConfigArgs, json_mode: bool) -> Result<()> {
    let config = load_config(args.config.as_ref()).context("Failed to load configuration")?;
    output(&ConfigOutput { config }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_output_lists_every_setting() {
        let out = ConfigOutput {
            config: Config::default(),
        };
        let human = out.to_human();
        assert!(human.contains("max_concurrent_reconciles"));
        assert!(human.contains("retry.max_backoff_ms"));
        assert!(human.contains("300000"));
    }

    #[test]
    fn test_json_output_is_the_config() {
        let out = ConfigOutput {
            config: Config::default(),
        };
        let json = out.to_json();
        assert_eq!(json["max_concurrent_reconciles"], 1);
        assert_eq!(json["logging"]["level"], "info");
    }
}
