//! Offline synthetic source.
//!
//! Candles are generated per bar from a seed derived from the symbol and the
//! bar's open time, so two fetches covering the same bar agree.

use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::error::{Error, Result};
use crate::market_data::OhlcvQuery;
use crate::market_data::connectors::SourceAdapter;
use crate::types::{Candle, Ticker, Timeframe};
use crate::utils::helper::current_timestamp_ms;

const DEFAULT_LIMIT: usize = 500;
const MAX_LIMIT: usize = 5000;

/// (symbol, base price, daily volatility)
const UNIVERSE: &[(&str, f64, f64)] = &[
    ("BTC-USDT", 50_000.0, 0.03),
    ("ETH-USDT", 3_000.0, 0.04),
    ("BNB-USDT", 400.0, 0.025),
    ("ADA-USDT", 0.5, 0.05),
    ("SOL-USDT", 100.0, 0.045),
    ("AAPL", 175.0, 0.015),
    ("GOOGL", 150.0, 0.02),
    ("MSFT", 400.0, 0.015),
    ("TSLA", 250.0, 0.04),
    ("AMZN", 170.0, 0.025),
];

pub struct DemoSource {
    connected: AtomicBool,
}

impl DemoSource {
    pub fn new() -> Self {
        DemoSource { connected: AtomicBool::new(false) }
    }

    pub fn symbols() -> impl Iterator<Item = &'static str> {
        UNIVERSE.iter().map(|(symbol, _, _)| *symbol)
    }

    fn profile(symbol: &str) -> Option<(&'static str, f64, f64)> {
        let lookup = |s: &str| UNIVERSE.iter().find(|(name, _, _)| *name == s).copied();
        lookup(symbol).or_else(|| lookup(symbol.trim_end_matches("-USDT")))
    }

    fn bar(symbol: &str, base: f64, volatility: f64, timeframe: Timeframe, open_time: u64) -> Candle {
        let mut rng = StdRng::seed_from_u64(seed(symbol) ^ open_time);

        let bar_index = (open_time / timeframe.millis()) as f64;
        let trend = (bar_index / 50.0).sin() * 0.05;
        let scale = (1440.0 / timeframe.minutes() as f64).sqrt();
        let drift: f64 = rng.gen_range(-1.0..1.0) * volatility / scale;

        let mid = (base * (1.0 + trend + drift)).clamp(base * 0.5, base * 2.0);
        let open = mid * (1.0 + rng.gen_range(-0.001..0.001));
        let close = mid * (1.0 + rng.gen_range(-0.001..0.001));
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));

        let base_volume = if symbol.contains("USDT") { 1_000_000.0 } else { 10_000.0 };
        let volume = base_volume * (1.0 + drift.abs() * 10.0) * rng.gen_range(0.5..1.5);

        Candle { timestamp: open_time, open, high, low, close, volume }
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DemoSource {
    fn name(&self) -> &str {
        "demo"
    }

    async fn connect(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Demo source connected");
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Demo source disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        Self::profile(symbol).is_some()
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>> {
        let (symbol, base, volatility) = Self::profile(&query.symbol)
            .ok_or_else(|| Error::unavailable("demo", format!("{} not available", query.symbol)))?;

        let step = query.timeframe.millis();
        let limit = query.effective_limit(DEFAULT_LIMIT, MAX_LIMIT) as u64;

        // Bars are aligned to the timeframe; the last one is the bar in progress.
        let (first, last) = match (query.start, query.end) {
            (Some(start), Some(end)) => (start.div_ceil(step) * step, end / step * step),
            (Some(start), None) => {
                let first = start.div_ceil(step) * step;
                (first, first + (limit - 1) * step)
            }
            (None, end) => {
                let last = end.unwrap_or_else(current_timestamp_ms) / step * step;
                (last.saturating_sub((limit - 1) * step), last)
            }
        };

        let candles: Vec<Candle> = (0..limit)
            .map(|i| first + i * step)
            .take_while(|open_time| *open_time <= last)
            .map(|open_time| Self::bar(symbol, base, volatility, query.timeframe, open_time))
            .collect();

        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let query = OhlcvQuery {
            symbol: symbol.to_string(),
            timeframe: Timeframe::OneMinute,
            start: None,
            end: None,
            limit: Some(2),
        };
        let candles = self.fetch_ohlcv(&query).await?;
        let (previous, latest) = match candles.as_slice() {
            [.., previous, latest] => (previous, latest),
            _ => return Err(Error::EmptyResult { source_name: "demo".into() }),
        };

        Ok(Ticker {
            bid: latest.close * 0.9995,
            ask: latest.close * 1.0005,
            last: latest.close,
            volume: latest.volume,
            change_pct: Ticker::change_from_open(previous.close, latest.close),
        })
    }
}

/// FNV-1a over the symbol bytes.
fn seed(symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |hash, byte| (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::FetchRequest;

    #[tokio::test]
    async fn test_bars_are_deterministic_and_aligned() {
        let source = DemoSource::new();
        let query = FetchRequest::new("BTC-USDT", Timeframe::OneHour)
            .with_range(None, Some(100 * 3_600_000 + 1234))
            .with_limit(10)
            .query_for("BTC-USDT".into());

        let first = source.fetch_ohlcv(&query).await.unwrap();
        let second = source.fetch_ohlcv(&query).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
        assert_eq!(first.last().unwrap().timestamp, 100 * 3_600_000);
        assert!(first.windows(2).all(|w| w[1].timestamp - w[0].timestamp == 3_600_000));
        assert!(first.iter().all(|c| c.low <= c.open.min(c.close) && c.high >= c.open.max(c.close)));
    }

    #[tokio::test]
    async fn test_stock_symbols_accept_usdt_suffix() {
        let source = DemoSource::new();
        assert!(source.is_symbol_valid("AAPL"));
        assert!(source.is_symbol_valid("AAPL-USDT"));
        assert!(!source.is_symbol_valid("DOGE-USDT"));

        let ticker = source.fetch_ticker("MSFT").await.unwrap();
        assert!(ticker.bid < ticker.last && ticker.last < ticker.ask);
    }
}
