use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            fetcher: FetcherConfig::default(),
            sources: default_sources(),
            realtime: RealtimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Layered load: `config/default`, then `config/{env}`, then
    /// `MARKET_RELAY__SECTION__KEY` environment variables.
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("MARKET_RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("fetcher.warmup_symbols")
                    .with_list_parse_key("fetcher.warmup_intervals")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetcher.source_timeout_ms == 0 {
            return Err(Error::ConfigError("fetcher.source_timeout_ms must be positive".into()));
        }
        if self.fetcher.warmup_batch_size == 0 {
            return Err(Error::ConfigError("fetcher.warmup_batch_size must be positive".into()));
        }
        if self.server.outbound_queue_size == 0 {
            return Err(Error::ConfigError("server.outbound_queue_size must be positive".into()));
        }
        if self.cache.operation_timeout_ms == 0 {
            return Err(Error::ConfigError("cache.operation_timeout_ms must be positive".into()));
        }
        if self.cache.reconnect_initial_ms > self.cache.reconnect_max_ms {
            return Err(Error::ConfigError(
                "cache.reconnect_initial_ms must not exceed cache.reconnect_max_ms".into(),
            ));
        }
        if !self.sources.iter().any(|s| s.enabled) {
            tracing::warn!("No market data sources enabled");
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}
