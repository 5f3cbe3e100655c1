use std::sync::Arc;
use anyhow::Context;
use tokio::net::TcpListener;
use market_relay::api::rest::create_router;
use market_relay::config::AppConfig;
use market_relay::context::AppContext;
use market_relay::observability::metrics::register_metrics;
use market_relay::observability::tracing::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("MARKET_RELAY_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env).context("failed to load configuration")?;

    init_tracing(&config.logging)?;
    register_metrics().context("failed to register metrics")?;
    tracing::info!("Starting market relay ({} environment)", env);

    let ctx = Arc::new(AppContext::build(config).await?);
    let updater_task = ctx.updater.spawn();

    let warmup_task = {
        let fetcher = ctx.fetcher.clone();
        let fetcher_config = ctx.config.fetcher.clone();
        tokio::spawn(async move {
            if fetcher_config.warmup_symbols.is_empty() {
                return;
            }
            fetcher
                .warmup(
                    &fetcher_config.warmup_symbols,
                    &fetcher_config.warmup_intervals,
                    fetcher_config.warmup_batch_size,
                )
                .await;
        })
    };

    let bind_address = ctx.config.server.bind_address.clone();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!("Listening on http://{} (live channel at /ws)", bind_address);

    axum::serve(listener, create_router(ctx.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    warmup_task.abort();
    ctx.shutdown().await;
    updater_task.await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
    }
}
