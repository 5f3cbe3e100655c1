//! Racing fetcher: one concurrent attempt per compatible source, first
//! non-empty answer wins and the losers are cancelled and awaited.

use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use crate::cache::CacheManager;
use crate::config::FetcherConfig;
use crate::error::{Error, Result};
use crate::market_data::connectors::SourceAdapter;
use crate::market_data::symbols::normalize_symbol;
use crate::market_data::{FetchOutcome, FetchRequest, OhlcvQuery, SourceRegistry};
use crate::observability::metrics::{FETCH_LATENCY, FETCH_WINS, SEQUENTIAL_FALLBACKS, SOURCE_FAILURES};
use crate::observability::tracing::trace_fetch;
use crate::types::{normalize_candles, Candle, Ticker, Timeframe};

/// An adapter paired with its rendering of the requested symbol.
type Candidate = (Arc<dyn SourceAdapter>, String);

#[derive(Serialize)]
struct CacheParams<'a> {
    symbol: &'a str,
    timeframe: Timeframe,
    start: Option<u64>,
    end: Option<u64>,
    limit: Option<usize>,
    source: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheRead {
    Use,
    Skip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WarmupSummary {
    pub requested: usize,
    pub succeeded: usize,
}

pub struct RacingFetcher {
    sources: SourceRegistry,
    cache: Option<Arc<CacheManager>>,
    source_timeout: Duration,
    cache_ttl: Duration,
    warmup_limit: usize,
}

impl RacingFetcher {
    pub fn new(sources: SourceRegistry, config: &FetcherConfig) -> Self {
        RacingFetcher {
            sources,
            cache: None,
            source_timeout: config.source_timeout(),
            cache_ttl: config.cache_ttl(),
            warmup_limit: config.warmup_limit,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let symbol = normalize_symbol(&request.symbol);
        let span = trace_fetch(&symbol, request.timeframe.as_str());
        self.fetch_normalized(symbol, request, CacheRead::Use).instrument(span).await
    }

    /// Race the sources without consulting the cache. The winner still
    /// refreshes the cached entry for `request`.
    pub async fn fetch_latest(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let symbol = normalize_symbol(&request.symbol);
        let span = trace_fetch(&symbol, request.timeframe.as_str());
        self.fetch_normalized(symbol, request, CacheRead::Skip).instrument(span).await
    }

    async fn fetch_normalized(&self, symbol: String, request: &FetchRequest, read: CacheRead) -> Result<FetchOutcome> {
        let key = self.cache_key(&symbol, request, None);
        if read == CacheRead::Use {
            if let Some(hit) = self.cached(key.as_deref()).await {
                return Ok(hit);
            }
        }

        let candidates = self.candidates(&symbol);
        if candidates.is_empty() {
            return Err(Error::NoCompatibleSource(symbol));
        }

        let _timer = FETCH_LATENCY.start_timer();
        let (source, candles) = match self.race(&candidates, request).await {
            Ok(winner) => winner,
            Err(failures) => {
                tracing::warn!(
                    "All {} parallel attempts failed ({}), falling back to sequential",
                    candidates.len(),
                    failures.join("; ")
                );
                SEQUENTIAL_FALLBACKS.inc();
                self.sequential(&symbol, &candidates, request).await?
            }
        };

        FETCH_WINS.with_label_values(&[source.as_str()]).inc();
        tracing::info!("Fetched {} candles from {}", candles.len(), source);

        let outcome = FetchOutcome {
            source,
            symbol,
            timeframe: request.timeframe,
            candles,
        };
        self.store(key.as_deref(), &outcome).await;
        Ok(outcome)
    }

    /// Single-source fetch, bypassing the race.
    pub async fn fetch_from(&self, source: &str, request: &FetchRequest) -> Result<FetchOutcome> {
        let adapter = self
            .sources
            .get(source)
            .ok_or_else(|| Error::UnknownSource(source.to_string()))?
            .clone();

        let symbol = normalize_symbol(&request.symbol);
        let span = trace_fetch(&symbol, request.timeframe.as_str());
        self.fetch_single(adapter, symbol, request).instrument(span).await
    }

    async fn fetch_single(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        symbol: String,
        request: &FetchRequest,
    ) -> Result<FetchOutcome> {
        let source = adapter.name();
        let key = self.cache_key(&symbol, request, Some(source));
        if let Some(hit) = self.cached(key.as_deref()).await {
            return Ok(hit);
        }

        let rendered = adapter
            .render_symbol(&symbol)
            .ok_or_else(|| Error::NoCompatibleSource(symbol.clone()))?;
        let query = request.query_for(rendered);

        let candles = attempt(adapter.as_ref(), &query, self.source_timeout)
            .await
            .inspect_err(|e| record_failure(source, e))?;

        let outcome = FetchOutcome {
            source: source.to_string(),
            symbol,
            timeframe: request.timeframe,
            candles,
        };
        self.store(key.as_deref(), &outcome).await;
        Ok(outcome)
    }

    /// First compatible source, in configuration order, that returns a ticker.
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<(String, Ticker)> {
        let symbol = normalize_symbol(symbol);
        let candidates = self.candidates(&symbol);
        if candidates.is_empty() {
            return Err(Error::NoCompatibleSource(symbol));
        }

        let mut failures = Vec::new();
        for (adapter, rendered) in &candidates {
            let name = adapter.name();
            match tokio::time::timeout(self.source_timeout, adapter.fetch_ticker(rendered)).await {
                Ok(Ok(ticker)) => return Ok((name.to_string(), ticker)),
                Ok(Err(e)) => {
                    record_failure(name, &e);
                    failures.push(format!("{}: {}", name, e));
                }
                Err(_) => {
                    let e = Error::SourceTimeout {
                        source_name: name.to_string(),
                        timeout_ms: self.source_timeout.as_millis() as u64,
                    };
                    record_failure(name, &e);
                    failures.push(e.to_string());
                }
            }
        }

        Err(Error::AllSourcesExhausted { symbol, failures })
    }

    /// Whether each configured source accepts `symbol`, in configuration order.
    pub fn validate_symbol(&self, symbol: &str) -> Vec<(String, bool)> {
        let symbol = normalize_symbol(symbol);
        self.sources
            .adapters()
            .iter()
            .map(|adapter| {
                let valid = adapter
                    .render_symbol(&symbol)
                    .is_some_and(|rendered| adapter.is_symbol_valid(&rendered));
                (adapter.name().to_string(), valid)
            })
            .collect()
    }

    /// Fetch the recent window for every symbol × interval, `batch_size`
    /// requests at a time. Failures are logged and never stop the run.
    pub async fn warmup(&self, symbols: &[String], intervals: &[String], batch_size: usize) -> WarmupSummary {
        let timeframes: Vec<Timeframe> = intervals
            .iter()
            .filter_map(|interval| match interval.parse::<Timeframe>() {
                Ok(timeframe) => Some(timeframe),
                Err(e) => {
                    tracing::warn!("Skipping warmup interval {}: {}", interval, e);
                    None
                }
            })
            .collect();

        let requests: Vec<FetchRequest> = symbols
            .iter()
            .flat_map(|symbol| {
                timeframes.iter().map(move |timeframe| {
                    FetchRequest::new(symbol.clone(), *timeframe).with_limit(self.warmup_limit)
                })
            })
            .collect();

        tracing::info!("Warming up cache for {} symbols ({} requests)", symbols.len(), requests.len());

        let mut summary = WarmupSummary { requested: requests.len(), succeeded: 0 };
        for batch in requests.chunks(batch_size.max(1)) {
            let results = join_all(batch.iter().map(|request| self.fetch(request))).await;
            for (request, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => summary.succeeded += 1,
                    Err(e) => tracing::warn!(
                        "Cache warmup failed for {} {}: {}",
                        request.symbol,
                        request.timeframe,
                        e
                    ),
                }
            }
        }

        tracing::info!("Cache warmup completed ({}/{})", summary.succeeded, summary.requested);
        summary
    }

    fn candidates(&self, symbol: &str) -> Vec<Candidate> {
        self.sources
            .adapters()
            .iter()
            .filter_map(|adapter| {
                let rendered = adapter.render_symbol(symbol)?;
                if adapter.is_symbol_valid(&rendered) {
                    Some((adapter.clone(), rendered))
                } else {
                    tracing::debug!("{} does not accept {} ({})", adapter.name(), symbol, rendered);
                    None
                }
            })
            .collect()
    }

    /// Returns the winner, or every attempt's failure once all have concluded.
    async fn race(
        &self,
        candidates: &[Candidate],
        request: &FetchRequest,
    ) -> std::result::Result<(String, Vec<Candle>), Vec<String>> {
        let parent = CancellationToken::new();
        let mut attempts = JoinSet::new();

        for (adapter, rendered) in candidates {
            let adapter = adapter.clone();
            let query = request.query_for(rendered.clone());
            let token = parent.child_token();
            let timeout = self.source_timeout;

            attempts.spawn(async move {
                let name = adapter.name().to_string();
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::AttemptCancelled { source_name: name.clone() }),
                    result = attempt(adapter.as_ref(), &query, timeout) => result,
                };
                (name, result)
            });
        }

        let mut failures = Vec::new();
        let mut winner = None;

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((name, Ok(candles))) => {
                    winner = Some((name, candles));
                    break;
                }
                Ok((name, Err(e))) => {
                    tracing::debug!("{} attempt failed: {}", name, e);
                    record_failure(&name, &e);
                    failures.push(format!("{}: {}", name, e));
                }
                Err(e) => {
                    tracing::error!("Fetch attempt task failed: {}", e);
                    failures.push(format!("attempt task: {}", e));
                }
            }
        }

        let Some(winner) = winner else {
            return Err(failures);
        };

        // Signal every loser and wait until each has observed it.
        parent.cancel();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((name, Err(Error::AttemptCancelled { .. }))) => {
                    tracing::debug!("Cancelled losing attempt against {}", name);
                }
                Ok((name, _)) => tracing::debug!("Attempt against {} concluded after the winner", name),
                Err(e) => tracing::error!("Fetch attempt task failed: {}", e),
            }
        }

        Ok(winner)
    }

    async fn sequential(
        &self,
        symbol: &str,
        candidates: &[Candidate],
        request: &FetchRequest,
    ) -> Result<(String, Vec<Candle>)> {
        let mut failures = Vec::with_capacity(candidates.len());

        for (adapter, rendered) in candidates {
            let name = adapter.name();
            match attempt(adapter.as_ref(), &request.query_for(rendered.clone()), self.source_timeout).await {
                Ok(candles) => return Ok((name.to_string(), candles)),
                Err(e) => {
                    record_failure(name, &e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        tracing::error!("All sources exhausted for {}", symbol);
        Err(Error::AllSourcesExhausted {
            symbol: symbol.to_string(),
            failures,
        })
    }

    fn cache_key(&self, symbol: &str, request: &FetchRequest, source: Option<&str>) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let params = CacheParams {
            symbol,
            timeframe: request.timeframe,
            start: request.start,
            end: request.end,
            limit: request.limit,
            source,
        };
        cache
            .key("ohlcv", &params)
            .inspect_err(|e| tracing::warn!("Could not derive cache key: {}", e))
            .ok()
    }

    async fn cached(&self, key: Option<&str>) -> Option<FetchOutcome> {
        let (cache, key) = (self.cache.as_ref()?, key?);
        let hit = cache.get::<FetchOutcome>(key).await?;
        tracing::debug!("Serving {} from cache ({})", key, hit.source);
        Some(hit)
    }

    async fn store(&self, key: Option<&str>, outcome: &FetchOutcome) {
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), key) {
            cache.set(key, outcome, Some(self.cache_ttl)).await;
        }
    }
}

/// One bounded attempt. An empty row set is a failure.
async fn attempt(adapter: &dyn SourceAdapter, query: &OhlcvQuery, timeout: Duration) -> Result<Vec<Candle>> {
    match tokio::time::timeout(timeout, adapter.fetch_ohlcv(query)).await {
        Err(_) => Err(Error::SourceTimeout {
            source_name: adapter.name().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(e),
        Ok(Ok(candles)) if candles.is_empty() => Err(Error::EmptyResult {
            source_name: adapter.name().to_string(),
        }),
        Ok(Ok(candles)) => Ok(normalize_candles(candles)),
    }
}

fn record_failure(source: &str, error: &Error) {
    let kind = match error {
        Error::SourceTimeout { .. } => "timeout",
        Error::EmptyResult { .. } => "empty",
        Error::AttemptCancelled { .. } => "cancelled",
        Error::SourceUnavailable { .. } | Error::HttpError(_) => "unavailable",
        Error::UnsupportedTimeframe { .. } => "unsupported",
        Error::DeserializationError(_) => "decode",
        _ => "other",
    };
    SOURCE_FAILURES.with_label_values(&[source, kind]).inc();
}
