//! Scriptable in-process source for exercising the fetcher.
//!
//! Each `fetch_ohlcv` call consumes the next [`MockBehavior`] of the script;
//! the last entry repeats once the script is exhausted.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use crate::error::{Error, Result};
use crate::market_data::OhlcvQuery;
use crate::market_data::connectors::SourceAdapter;
use crate::types::{Candle, Ticker};

#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Resolve with `candles` after `delay`.
    Succeed { delay: Duration, candles: Vec<Candle> },
    /// Fail with `SourceUnavailable` after `delay`.
    Fail { delay: Duration, reason: String },
    /// Resolve with no rows after `delay`.
    Empty { delay: Duration },
    /// Never resolve.
    Hang,
}

impl MockBehavior {
    pub fn succeed_after(delay: Duration, candles: Vec<Candle>) -> Self {
        MockBehavior::Succeed { delay, candles }
    }

    pub fn fail_after(delay: Duration) -> Self {
        MockBehavior::Fail { delay, reason: "scripted failure".to_string() }
    }
}

pub struct MockSource {
    name: String,
    script: Mutex<Vec<MockBehavior>>,
    accepted: Option<HashSet<String>>,
    connect_ok: bool,
    connected: AtomicBool,
    calls: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl MockSource {
    pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
        Self::scripted(name, vec![behavior])
    }

    pub fn scripted(name: impl Into<String>, script: Vec<MockBehavior>) -> Self {
        MockSource {
            name: name.into(),
            script: Mutex::new(script),
            accepted: None,
            connect_ok: true,
            connected: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Restrict `is_symbol_valid` to these symbols; all are accepted otherwise.
    #[must_use]
    pub fn accepting(mut self, symbols: &[&str]) -> Self {
        self.accepted = Some(symbols.iter().map(|s| s.to_string()).collect());
        self
    }

    #[must_use]
    pub fn refusing_connect(mut self) -> Self {
        self.connect_ok = false;
        self
    }

    /// Number of `fetch_ohlcv` calls started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to their scripted end.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Calls whose future was dropped before resolving.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> MockBehavior {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        match script.len() {
            0 => MockBehavior::Hang,
            1 => script[0].clone(),
            _ => script.remove(0),
        }
    }
}

/// Counts the call as cancelled unless it was disarmed on completion.
struct InFlight<'a> {
    source: &'a MockSource,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.source.cancelled.fetch_add(1, Ordering::SeqCst);
        } else {
            self.source.completed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> bool {
        self.connected.store(self.connect_ok, Ordering::SeqCst);
        self.connect_ok
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn render_symbol(&self, canonical: &str) -> Option<String> {
        Some(canonical.to_string())
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        self.accepted.as_ref().is_none_or(|accepted| accepted.contains(symbol))
    }

    async fn fetch_ohlcv(&self, _query: &OhlcvQuery) -> Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = InFlight { source: self, armed: true };

        let result = match self.next_behavior() {
            MockBehavior::Succeed { delay, candles } => {
                tokio::time::sleep(delay).await;
                Ok(candles)
            }
            MockBehavior::Fail { delay, reason } => {
                tokio::time::sleep(delay).await;
                Err(Error::unavailable(&self.name, reason))
            }
            MockBehavior::Empty { delay } => {
                tokio::time::sleep(delay).await;
                Ok(Vec::new())
            }
            MockBehavior::Hang => std::future::pending().await,
        };

        guard.armed = false;
        result
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker> {
        Ok(Ticker { bid: 99.0, ask: 101.0, last: 100.0, volume: 1.0, change_pct: 0.0 })
    }
}

/// `count` one-minute candles starting at `start`, closing at `price`.
pub fn flat_candles(start: u64, count: usize, price: f64) -> Vec<Candle> {
    (0..count as u64)
        .map(|i| Candle {
            timestamp: start + i * 60_000,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::FetchRequest;
    use crate::types::Timeframe;

    fn query() -> OhlcvQuery {
        FetchRequest::new("BTC-USDT", Timeframe::OneMinute).query_for("BTC-USDT".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_advances_then_repeats_last() {
        let source = MockSource::scripted(
            "m",
            vec![
                MockBehavior::fail_after(Duration::from_millis(10)),
                MockBehavior::succeed_after(Duration::ZERO, flat_candles(0, 2, 1.0)),
            ],
        );

        assert!(source.fetch_ohlcv(&query()).await.is_err());
        assert_eq!(source.fetch_ohlcv(&query()).await.unwrap().len(), 2);
        assert_eq!(source.fetch_ohlcv(&query()).await.unwrap().len(), 2);
        assert_eq!(source.calls(), 3);
        assert_eq!(source.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_counts_as_cancelled() {
        let source = MockSource::new("m", MockBehavior::Hang);
        let attempt = tokio::time::timeout(Duration::from_secs(1), source.fetch_ohlcv(&query())).await;

        assert!(attempt.is_err());
        assert_eq!(source.cancelled(), 1);
        assert_eq!(source.completed(), 0);
    }
}
