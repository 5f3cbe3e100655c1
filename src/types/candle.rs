use serde::{Deserialize, Serialize};

/// One OHLCV row. `timestamp` is the candle open time in milliseconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Top-of-book snapshot for a symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
    pub change_pct: f64,
}

impl Ticker {
    /// Percent change from `open` to `last`; zero when `open` is not positive.
    pub fn change_from_open(open: f64, last: f64) -> f64 {
        if open > 0.0 {
            (last - open) / open * 100.0
        } else {
            0.0
        }
    }
}

/// Sort ascending by timestamp and drop duplicate timestamps, keeping the
/// last row seen for each one.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    // Stable sort keeps arrival order among equal timestamps.
    candles.sort_by_key(|c| c.timestamp);

    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(prev) if prev.timestamp == candle.timestamp => *prev = candle,
            _ => out.push(candle),
        }
    }
    out
}
