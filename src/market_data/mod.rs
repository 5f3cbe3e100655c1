pub mod connectors;
pub mod fetcher;
pub mod registry;
pub mod symbols;

use serde::{Deserialize, Serialize};
use crate::types::{Candle, Timeframe};

pub use fetcher::RacingFetcher;
pub use registry::SourceRegistry;

/// Source-agnostic OHLCV request. Bounds are epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        FetchRequest {
            symbol: symbol.into(),
            timeframe,
            start: None,
            end: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn with_range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The query a single adapter receives, with the venue's own symbol rendering.
    pub fn query_for(&self, source_symbol: String) -> OhlcvQuery {
        OhlcvQuery {
            symbol: source_symbol,
            timeframe: self.timeframe,
            start: self.start,
            end: self.end,
            limit: self.limit,
        }
    }
}

/// What a [`connectors::SourceAdapter`] is asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct OhlcvQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub limit: Option<usize>,
}

impl OhlcvQuery {
    /// Row count to request: the explicit limit, else the span between the
    /// bounds, else `default`; never above `max`.
    pub fn effective_limit(&self, default: usize, max: usize) -> usize {
        let wanted = match (self.limit, self.start, self.end) {
            (Some(limit), _, _) => limit,
            (None, Some(start), Some(end)) if end > start => {
                ((end - start) / self.timeframe.millis()) as usize
            }
            _ => default,
        };
        wanted.clamp(1, max)
    }
}

/// A winning fetch: which source answered and its rows, ascending and
/// unique by timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub source: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl FetchOutcome {
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}
