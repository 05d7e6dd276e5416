//! sqlproxy-operator CLI entry point.

use clap::Parser;

use sqlproxy_operator::cli::{self, Cli};
use sqlproxy_operator::infrastructure::config::ConfigLoader;
use sqlproxy_operator::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let log_config = ConfigLoader::load()
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    if let Err(err) = cli::run(cli).await {
        cli::handle_error(err, json);
    }
}
