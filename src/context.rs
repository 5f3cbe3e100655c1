use std::sync::Arc;
use crate::cache::CacheManager;
use crate::config::AppConfig;
use crate::error::Result;
use crate::market_data::{RacingFetcher, SourceRegistry};
use crate::streaming::{Broadcaster, RealtimeUpdater, SubscriptionRegistry};

/// Everything shared across the service, built once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub cache: Arc<CacheManager>,
    pub fetcher: Arc<RacingFetcher>,
    pub registry: Arc<SubscriptionRegistry>,
    pub broadcaster: Broadcaster,
    pub updater: Arc<RealtimeUpdater>,
}

impl AppContext {
    /// Build from configuration and connect the enabled sources. Sources
    /// that fail to connect are left out.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let cache = CacheManager::from_config(&config.cache)?;

        let mut sources = SourceRegistry::from_config(&config.sources, config.fetcher.source_timeout())?;
        if sources.connect_all().await == 0 {
            tracing::warn!("No market data source connected; fetches will fail");
        }

        Ok(Self::assemble(config, cache, sources))
    }

    pub fn assemble(config: AppConfig, cache: CacheManager, sources: SourceRegistry) -> Self {
        let cache = Arc::new(cache);
        let fetcher = Arc::new(RacingFetcher::new(sources, &config.fetcher).with_cache(cache.clone()));
        let registry = Arc::new(SubscriptionRegistry::new(config.server.outbound_queue_size));
        let broadcaster = Broadcaster::new(registry.clone());
        let updater = Arc::new(RealtimeUpdater::new(
            fetcher.clone(),
            broadcaster.clone(),
            config.realtime.clone(),
        ));

        AppContext {
            config,
            cache,
            fetcher,
            registry,
            broadcaster,
            updater,
        }
    }

    /// Producers stop before clients are dropped; upstreams are released last.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.updater.shutdown().await;
        self.registry.disconnect_all();
        self.fetcher.sources().disconnect_all().await;
        self.cache.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheBackendKind, SourceConfig};
    use crate::market_data::FetchRequest;
    use crate::types::Timeframe;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.backend = CacheBackendKind::Memory;
        config.sources = vec![SourceConfig::named("demo")];
        config
    }

    #[tokio::test]
    async fn test_build_and_shutdown_offline() {
        let ctx = AppContext::build(offline_config()).await.unwrap();
        assert_eq!(ctx.fetcher.sources().names(), vec!["demo"]);

        let outcome = ctx
            .fetcher
            .fetch(&FetchRequest::new("BTC/USDT", Timeframe::OneHour).with_limit(24))
            .await
            .unwrap();
        assert_eq!(outcome.source, "demo");
        assert_eq!(outcome.candles.len(), 24);

        let (_id, _rx) = ctx.registry.register();
        ctx.shutdown().await;
        assert_eq!(ctx.registry.connection_count(), 0);
        assert!(!ctx.cache.is_connected());
    }
}
