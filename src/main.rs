use anyhow::{Context, Result};
use clap::Parser;
use gatekeeper::config::{Config, StorageBackend};
use gatekeeper::server::Server;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "HTTP rate limiting admission gate")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Storage backend, overriding STORAGE_BACKEND
    #[arg(long, value_enum)]
    storage: Option<StorageBackend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables from .env file
    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gatekeeper={},tower_http=debug", config.env.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = cli.storage.unwrap_or(config.env.storage_backend);

    tracing::info!("Starting gatekeeper service");
    tracing::info!(
        port = config.env.server_port,
        redis = %config.redis_addr(),
        backend = %backend,
        ip_rate_limit = config.env.ip_rate_limit,
        token_rate_limit = config.env.token_rate_limit,
        token_overrides = config.token_overrides.len(),
        "Configuration loaded"
    );

    let server = Server::new(&config, backend)
        .await
        .context("Failed to create server")?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
