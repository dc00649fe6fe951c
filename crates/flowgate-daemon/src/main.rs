//! flowgated - rate-limiting reverse proxy daemon
//!
//! Wires the pieces together in dependency order: config, logging, store
//! pool and migrations, bucket service, balancer strategy, health checker,
//! proxy engine and finally the shared listener. SIGINT starts a graceful
//! shutdown that closes the listener and drains in-flight requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flowgate_balancer::{create_strategy, Balancer};
use flowgate_core::{BucketService, Config};
use flowgate_http::{ApiHandler, AppState, GatewayServer, HealthChecker, ProxyEngine};
use flowgate_store::{DatabasePool, SqliteBucketStore};

#[derive(Debug, Parser)]
#[command(name = "flowgated", about = "Rate-limiting HTTP reverse proxy", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config/flowgate.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    init_tracing(&cfg.logging.level)?;

    let validation_errors = cfg.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            error!(field = %err.field, message = %err.message, "invalid configuration");
        }
        anyhow::bail!("configuration failed validation");
    }

    // Store pool (runs migrations) and the admission service on top.
    let pool = DatabasePool::new(
        Path::new(&cfg.db.path),
        cfg.db.max_conns,
        cfg.db.busy_timeout.as_std(),
    )
    .await
    .context("initializing bucket store")?;
    let store = Arc::new(SqliteBucketStore::new(pool.pool().clone()));
    let buckets = Arc::new(BucketService::new(&cfg, store));

    // Balancer seeded with the configured backends; the health checker
    // narrows it to the live subset from the first round onward.
    let strategy = create_strategy(&cfg.balancer.strategy, cfg.balancer.backends.clone())
        .context("building balancer strategy")?;
    let balancer = Arc::new(Balancer::new(strategy));

    let shutdown = CancellationToken::new();

    let health = HealthChecker::new(&cfg, Arc::clone(&balancer));
    let health_task = tokio::spawn(health.run(shutdown.clone()));

    let proxy = ProxyEngine::new(&cfg.proxy, Arc::clone(&balancer), Arc::clone(&buckets))
        .context("building origin transport")?;
    let api = ApiHandler::new(Arc::clone(&buckets), cfg.api.default_limit);
    let state = Arc::new(AppState { proxy, api });

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let server = GatewayServer::bind(&addr, state, cfg.server.shutdown_timeout.as_std())
        .await
        .with_context(|| format!("binding listener on {addr}"))?;

    info!(addr = %addr, "starting server");
    let server_task = tokio::spawn(server.serve(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");
    shutdown.cancel();

    server_task
        .await
        .context("joining server task")?
        .context("server error")?;
    health_task.await.context("joining health checker task")?;

    info!("server exited gracefully");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("building log filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
