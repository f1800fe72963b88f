use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use keyrelay_core::engine::ProxyEngine;
use keyrelay_core::models_cache::ModelsCache;
use keyrelay_core::upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
use keyrelay_router::RouterState;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let boot = keyrelay_core::bootstrap::bootstrap_from_env()?;

    let client: Arc<dyn UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(UpstreamClientConfig::default())?);
    let engine = Arc::new(ProxyEngine::new(
        boot.config.clone(),
        boot.pool.clone(),
        client.clone(),
    ));
    let models = Arc::new(ModelsCache::new(boot.config.models_cache_ttl));

    let app = keyrelay_router::router(RouterState {
        engine,
        models,
        client,
    });

    let reloader = keyrelay_core::lifecycle::spawn_reloader(boot.pool.clone());

    let bind = format!("{}:{}", boot.config.host, boot.config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(event = "listening", addr = %bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Background tasks stop before the process exits.
    reloader.abort();
    info!(event = "shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!(event = "shutdown_signal");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
