use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use crate::error::{Error, Result};
use crate::market_data::OhlcvQuery;
use crate::market_data::connectors::SourceAdapter;
use crate::market_data::connectors::http::{build_client, endpoint, get_json, parse_decimal};
use crate::types::{normalize_candles, Candle, Ticker, Timeframe};

pub const DEFAULT_BASE_URL: &str = "https://api.kraken.com";
const MAX_LIMIT: usize = 720;

pub struct KrakenSource {
    source_id: String,
    base_url: String,
    client: Client,
    connected: AtomicBool,
    /// Accepted pair names, both the REST key (`XXBTZUSD`) and the altname (`XBTUSD`).
    pairs: RwLock<HashSet<String>>,
}

/// Kraken wraps every payload as `{"error": [...], "result": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self, source: &str) -> Result<T> {
        if !self.error.is_empty() {
            return Err(Error::unavailable(source, self.error.join(", ")));
        }
        self.result
            .ok_or_else(|| Error::DeserializationError(format!("{}: missing result", source)))
    }
}

impl KrakenSource {
    pub fn new(base_url: Option<&str>, request_timeout: Duration) -> Self {
        KrakenSource {
            source_id: "kraken".to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            client: build_client(request_timeout),
            connected: AtomicBool::new(false),
            pairs: RwLock::new(HashSet::new()),
        }
    }

    fn interval_minutes(&self, timeframe: Timeframe) -> Result<u64> {
        match timeframe {
            Timeframe::OneMonth => Err(Error::UnsupportedTimeframe {
                source_name: self.source_id.clone(),
                timeframe: timeframe.to_string(),
            }),
            other => Ok(other.minutes()),
        }
    }

    async fn load_pairs(&self) -> Result<usize> {
        let envelope: Envelope<HashMap<String, AssetPair>> = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "0/public/AssetPairs"),
            &[] as &[(&str, &str)],
        )
        .await?;
        let pairs = envelope.into_result(&self.source_id)?;

        let mut names = HashSet::with_capacity(pairs.len() * 2);
        for (key, pair) in pairs {
            if let Some(alt) = pair.altname {
                names.insert(alt);
            }
            names.insert(key);
        }
        let count = names.len();

        *self.pairs.write().unwrap_or_else(|e| e.into_inner()) = names;
        Ok(count)
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() || self.connect().await {
            Ok(())
        } else {
            Err(Error::unavailable(&self.source_id, "not connected"))
        }
    }
}

#[async_trait]
impl SourceAdapter for KrakenSource {
    fn name(&self) -> &str {
        &self.source_id
    }

    async fn connect(&self) -> bool {
        match self.load_pairs().await {
            Ok(count) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!("Connected to Kraken ({} pair names)", count);
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!("Failed to connect to Kraken: {}", e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from Kraken");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        self.pairs
            .read()
            .map(|pairs| pairs.contains(symbol))
            .unwrap_or(false)
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>> {
        let interval = self.interval_minutes(query.timeframe)?;
        self.ensure_connected().await?;

        let mut params: Vec<(&str, String)> = vec![
            ("pair", query.symbol.clone()),
            ("interval", interval.to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("since", (start / 1000).to_string()));
        }

        let envelope: Envelope<HashMap<String, Value>> = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "0/public/OHLC"),
            &params,
        )
        .await?;
        let result = envelope.into_result(&self.source_id)?;

        // The result map holds one entry per pair plus a `last` cursor.
        let rows = result
            .iter()
            .find(|(key, _)| key.as_str() != "last")
            .and_then(|(_, value)| value.as_array())
            .ok_or_else(|| Error::DeserializationError("kraken: no OHLC rows".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = row.as_array().and_then(|r| parse_ohlc(r));
            candles.push(parsed.ok_or_else(|| {
                Error::DeserializationError(format!("kraken: malformed OHLC row {:?}", row))
            })?);
        }

        if let Some(end) = query.end {
            candles.retain(|c| c.timestamp <= end);
        }

        let limit = query.effective_limit(MAX_LIMIT, MAX_LIMIT);
        let mut candles = normalize_candles(candles);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure_connected().await?;

        let envelope: Envelope<HashMap<String, PairTicker>> = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "0/public/Ticker"),
            &[("pair", symbol)],
        )
        .await?;
        let raw = envelope
            .into_result(&self.source_id)?
            .into_values()
            .next()
            .ok_or_else(|| Error::unavailable(&self.source_id, format!("no ticker for {}", symbol)))?;

        let first = |fields: &[String]| fields.first().and_then(|v| v.parse().ok()).unwrap_or(0.0);
        // Volume field is [today, last 24h].
        let volume = raw.v.get(1).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let last = first(&raw.c);
        let open = raw.o.parse().unwrap_or(0.0);

        Ok(Ticker {
            bid: first(&raw.b),
            ask: first(&raw.a),
            last,
            volume,
            change_pct: Ticker::change_from_open(open, last),
        })
    }
}

/// `[time_secs, open, high, low, close, vwap, volume, count]`
fn parse_ohlc(row: &[Value]) -> Option<Candle> {
    Some(Candle {
        timestamp: row.first()?.as_u64()? * 1000,
        open: parse_decimal(row.get(1)?)?,
        high: parse_decimal(row.get(2)?)?,
        low: parse_decimal(row.get(3)?)?,
        close: parse_decimal(row.get(4)?)?,
        volume: parse_decimal(row.get(6)?)?,
    })
}

#[derive(Deserialize)]
struct AssetPair {
    altname: Option<String>,
}

#[derive(Deserialize)]
struct PairTicker {
    a: Vec<String>,
    b: Vec<String>,
    c: Vec<String>,
    v: Vec<String>,
    o: String,
}
