use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use aps_common::AppConfig;
use aps_core::{AppState, Core, UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("aps failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_path(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    cli.server_patch().apply_to(&mut config.server);
    init_tracing(config.server.verbose);

    let state = AppState::from_config(&config).context("validate providers")?;
    for provider in state.registry.providers_by_priority() {
        info!(
            provider = %provider.name,
            protocol = %provider.protocol,
            priority = provider.priority,
            base_url = %provider.base_url,
            models = provider.model_map.len(),
            "provider ready"
        );
    }

    let provider_count = state.registry.len();

    let client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig::default())
            .context("build upstream http client")?,
    );
    let core = Core::new(Arc::new(state), client);

    let bind = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        addr = %bind,
        providers = provider_count,
        cooldown_secs = config.failover.cooldown_seconds,
        cooldown_429_secs = config.failover.cooldown_429_seconds,
        cooldown_403_secs = config.failover.cooldown_403_seconds,
        "listening"
    );
    axum::serve(listener, core.router())
        .await
        .context("serve")?;

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "aps=debug" } else { "aps=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
