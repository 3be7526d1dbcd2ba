mod runner;

use ac_acme::{provider_by_name, DirectoryClient};
use ac_common::Config;
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autocert=debug".parse().unwrap()),
        )
        .init();

    info!("autocert starting...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    info!(
        domains = ?config.domains,
        email = %config.email,
        provider = %config.provider,
        directory = ?config.directory,
        "configuration loaded"
    );

    let provider = provider_by_name(&config.provider)
        .context("failed to set up challenge provider")?;
    let client = DirectoryClient::new(
        config.directory,
        provider,
        config.dns.clone(),
        config.dns_timeout(),
    );

    runner::run(&config, &client).await
}
