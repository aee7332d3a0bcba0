use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewall::config::{BackendKind, LogFormat, RatewallConfig};
use ratewall::gateway::{Classifier, HttpServer, RateLimitService};
use ratewall::ratelimit::{LimiterStore, MemoryStore, RateLimiter, RedisStore};

/// Request rate admission filter.
#[derive(Parser, Debug)]
#[command(name = "ratewall", version, about)]
struct Args {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, env = "RATEWALL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.listen_addr`
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Variables from `.env` never replace ones already set in the environment.
    let env_file = dotenvy::dotenv().ok();

    let mut config = RatewallConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(config.logging.format);

    info!("Starting Ratewall");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = ?args.config,
        env_file = ?env_file,
        listen_addr = %config.server.listen_addr,
        ip_limit = config.limits.ip_limit,
        token_limit = config.limits.token_limit,
        block_duration_secs = config.limits.block_duration_secs,
        "Configuration loaded"
    );

    let store: Arc<dyn LimiterStore> = match config.storage.backend {
        BackendKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            if let Some(period) = config.storage.sweep_interval() {
                store.spawn_sweeper(period);
            }
            info!("Using in-memory limiter store");
            store
        }
        BackendKind::Redis => {
            info!(addr = %config.storage.redis_addr, "Using Redis limiter store");
            let store = RedisStore::connect_addr(
                &config.storage.redis_addr,
                &config.storage.redis_password,
            )
            .await
            .context("Failed to connect to Redis")?;
            Arc::new(store)
        }
    };

    let rate_limiter = Arc::new(RateLimiter::new(store, config.limits.policy()));
    let classifier = Classifier::new(&config.classifier)?;
    let service = Arc::new(RateLimitService::new(
        rate_limiter,
        classifier,
        config.storage.timeout(),
        config.storage.failure_mode,
    ));

    let server = HttpServer::new(config.server.listen_addr, service);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Ratewall stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
