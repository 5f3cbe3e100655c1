use std::collections::HashMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};

pub mod loader;

pub use loader::AppConfig;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Outbound messages buffered per live connection before it counts as failed.
    pub outbound_queue_size: usize,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: "0.0.0.0:8000".to_string(),
            outbound_queue_size: 1000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub default_ttl_secs: u64,
    /// Serialized parameter sets longer than this are replaced by their hash.
    pub key_hash_threshold: usize,
    pub operation_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            backend: CacheBackendKind::Redis,
            redis_url: "redis://localhost:6379/0".to_string(),
            default_ttl_secs: 300,  // 5 minutes
            key_hash_threshold: 200,
            operation_timeout_ms: 1000,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub source_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub warmup_batch_size: usize,
    pub warmup_limit: usize,
    pub warmup_symbols: Vec<String>,
    pub warmup_intervals: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            source_timeout_ms: 5000,
            cache_ttl_secs: 300,
            warmup_batch_size: 5,
            warmup_limit: 100,
            warmup_symbols: Vec::new(),
            warmup_intervals: vec!["1h".to_string(), "1d".to_string()],
        }
    }
}

impl FetcherConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Data directory for file-backed sources.
    #[serde(default)]
    pub path: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    pub fn named(name: &str) -> Self {
        SourceConfig {
            name: name.to_string(),
            enabled: true,
            base_url: None,
            path: None,
        }
    }
}

pub(crate) fn default_sources() -> Vec<SourceConfig> {
    ["binance", "coinbase", "kraken"]
        .iter()
        .map(|name| SourceConfig::named(name))
        .collect()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Poll period in seconds keyed by interval string.
    pub poll_secs: HashMap<String, u64>,
    pub default_poll_secs: u64,
    pub subscription_check_secs: u64,
    pub candles_per_poll: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        let poll_secs = [
            ("1m", 10),
            ("5m", 30),
            ("15m", 60),
            ("30m", 60),
            ("1h", 60),
            ("4h", 300),
            ("1d", 600),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        RealtimeConfig {
            poll_secs,
            default_poll_secs: 60,
            subscription_check_secs: 30,
            candles_per_poll: 5,
        }
    }
}

impl RealtimeConfig {
    pub fn poll_period(&self, interval: &str) -> Duration {
        Duration::from_secs(*self.poll_secs.get(interval).unwrap_or(&self.default_poll_secs))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}
