use anyhow::Context;
use memoryops_proxy::api::{build_router, AppState};
use memoryops_proxy::config::{Config, LoggingConfig};
use memoryops_proxy::quota::RateLimiter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn spawn_idle_eviction(limiter: Arc<RateLimiter>) {
    if limiter.config().idle_eviction_windows.is_none() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_idle();
            if evicted > 0 {
                debug!(evicted, remaining = limiter.tracked_identities(), "Evicted idle quotas");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("MEMORYOPS_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(Some(Path::new(&config_path)))
        .context("Failed to load configuration")?;

    init_tracing(&config.logging);

    let state = AppState::from_config(&config).context("Failed to initialize proxy")?;
    if !state.authenticator.is_enabled() {
        info!("No API keys configured, authentication disabled");
    }
    spawn_idle_eviction(state.limiter.clone());

    let app = build_router(state, config.server.max_body_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        addr = %addr,
        upstream = %config.upstream.base_url,
        top_k = config.compression.top_k,
        "MemoryOps proxy listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
