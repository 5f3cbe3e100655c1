use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::ConfigError(format!("invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::ConfigError(format!("tracing already initialised: {}", e)))
}

pub fn trace_fetch(symbol: &str, timeframe: &str) -> Span {
    tracing::info_span!(
        "fetch",
        symbol = %symbol,
        timeframe = %timeframe,
    )
}

pub fn trace_broadcast(key: &str) -> Span {
    tracing::debug_span!(
        "broadcast",
        key = %key,
    )
}

pub fn trace_session(connection: &str) -> Span {
    tracing::info_span!(
        "session",
        connection = %connection,
    )
}
