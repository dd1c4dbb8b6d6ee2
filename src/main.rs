mod admin;
mod ai;
mod authz;
mod config;
mod entity;
mod error;
mod http;
mod pipeline;
mod policy;
mod rate_limit;
mod store;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    let store = store::Store::open(&config.data_dir).await?;
    let ai = ai::create_backend(&config)?;
    let gate = Arc::new(authz::AuthorizationGate::new(
        authz::create_decision_point(&config)?,
        &config.authz_resource,
    ));
    let window_secs =
        i64::try_from(config.window_secs).context("limits.window_secs out of range")?;
    let limiter = Arc::new(rate_limit::RateLimiter::new(rate_limit::RateLimitConfig {
        max_requests: config.max_requests,
        window: chrono::Duration::seconds(window_secs),
        cleanup_interval: config.cleanup_interval,
    }));

    let pipeline = Arc::new(pipeline::MediationPipeline::new(
        limiter,
        gate.clone(),
        ai,
        store.clone(),
        config.max_prompt_chars,
    ));
    let console = Arc::new(admin::GuardianConsole::new(gate, store));
    let app = http::router(http::AppState { pipeline, console });

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
