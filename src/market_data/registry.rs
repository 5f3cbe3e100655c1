use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::market_data::connectors::{
    BinanceSource, CoinbaseSource, CsvSource, DemoSource, KrakenSource, SourceAdapter, YahooSource,
};

/// Ordered set of source adapters. Order is configuration order and is the
/// order of the sequential fallback pass.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        SourceRegistry { adapters: Vec::new() }
    }

    /// Instantiate every enabled source; unknown names are a configuration error.
    pub fn from_config<'a>(
        sources: impl IntoIterator<Item = &'a SourceConfig>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut registry = SourceRegistry::new();
        for source in sources.into_iter().filter(|s| s.enabled) {
            let base_url = source.base_url.as_deref();
            let adapter: Arc<dyn SourceAdapter> = match source.name.as_str() {
                "binance" => Arc::new(BinanceSource::new(base_url, request_timeout)),
                "coinbase" => Arc::new(CoinbaseSource::new(base_url, request_timeout)),
                "kraken" => Arc::new(KrakenSource::new(base_url, request_timeout)),
                "yahoo" => Arc::new(YahooSource::new(base_url, request_timeout)),
                "csv" => Arc::new(CsvSource::new(source.path.as_deref())),
                "demo" => Arc::new(DemoSource::new()),
                other => return Err(Error::UnknownSource(other.to_string())),
            };
            registry.register(adapter);
        }
        Ok(registry)
    }

    /// Add an adapter, replacing one with the same name in place.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        match self.adapters.iter().position(|a| a.name() == adapter.name()) {
            Some(index) => self.adapters[index] = adapter,
            None => self.adapters.push(adapter),
        }
    }

    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Connect all adapters concurrently and drop those that fail.
    /// Returns the number kept.
    pub async fn connect_all(&mut self) -> usize {
        let results = join_all(self.adapters.iter().map(|a| a.connect())).await;

        let mut kept = Vec::with_capacity(self.adapters.len());
        for (adapter, connected) in self.adapters.drain(..).zip(results) {
            if connected {
                kept.push(adapter);
            } else {
                tracing::warn!("Dropping source {}: connect failed", adapter.name());
            }
        }
        self.adapters = kept;

        tracing::info!("Connected {} market data sources: {:?}", self.adapters.len(), self.names());
        self.adapters.len()
    }

    pub async fn disconnect_all(&self) {
        join_all(self.adapters.iter().map(|a| a.disconnect())).await;
    }
}
