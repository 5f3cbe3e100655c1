use std::collections::HashSet;
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
use crate::types::{normalize_candles, Candle, Ticker};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_LIMIT: usize = 1000;
const DEFAULT_LIMIT: usize = 500;

pub struct BinanceSource {
    source_id: String,
    base_url: String,
    client: Client,
    connected: AtomicBool,
    markets: RwLock<HashSet<String>>,
}

impl BinanceSource {
    pub fn new(base_url: Option<&str>, request_timeout: Duration) -> Self {
        BinanceSource {
            source_id: "binance".to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            client: build_client(request_timeout),
            connected: AtomicBool::new(false),
            markets: RwLock::new(HashSet::new()),
        }
    }

    async fn load_markets(&self) -> Result<usize> {
        let info: ExchangeInfo = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "api/v3/exchangeInfo"),
            &[("permissions", "SPOT")],
        )
        .await?;

        let trading: HashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();
        let count = trading.len();

        *self.markets.write().unwrap_or_else(|e| e.into_inner()) = trading;
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
impl SourceAdapter for BinanceSource {
    fn name(&self) -> &str {
        &self.source_id
    }

    async fn connect(&self) -> bool {
        match self.load_markets().await {
            Ok(count) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!("Connected to Binance ({} markets)", count);
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!("Failed to connect to Binance: {}", e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from Binance");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        self.markets
            .read()
            .map(|markets| markets.contains(symbol))
            .unwrap_or(false)
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>> {
        self.ensure_connected().await?;

        let mut params: Vec<(&str, String)> = vec![
            ("symbol", query.symbol.clone()),
            ("interval", query.timeframe.as_str().to_string()),
            ("limit", query.effective_limit(DEFAULT_LIMIT, MAX_LIMIT).to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = query.end {
            params.push(("endTime", end.to_string()));
        }

        let rows: Vec<Vec<Value>> = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "api/v3/klines"),
            &params,
        )
        .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            candles.push(parse_kline(row).ok_or_else(|| {
                Error::DeserializationError(format!("binance: malformed kline {:?}", row))
            })?);
        }

        if let Some(end) = query.end {
            candles.retain(|c| c.timestamp <= end);
        }

        Ok(normalize_candles(candles))
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure_connected().await?;

        let raw: Ticker24h = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "api/v3/ticker/24hr"),
            &[("symbol", symbol)],
        )
        .await?;

        Ok(Ticker {
            bid: raw.bid_price.parse().unwrap_or(0.0),
            ask: raw.ask_price.parse().unwrap_or(0.0),
            last: raw.last_price.parse().unwrap_or(0.0),
            volume: raw.quote_volume.parse().unwrap_or(0.0),
            change_pct: raw.price_change_percent.parse().unwrap_or(0.0),
        })
    }
}

/// `[open_time, open, high, low, close, volume, close_time, ...]`
fn parse_kline(row: &[Value]) -> Option<Candle> {
    Some(Candle {
        timestamp: row.first()?.as_u64()?,
        open: parse_decimal(row.get(1)?)?,
        high: parse_decimal(row.get(2)?)?,
        low: parse_decimal(row.get(3)?)?,
        close: parse_decimal(row.get(4)?)?,
        volume: parse_decimal(row.get(5)?)?,
    })
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<MarketInfo>,
}

#[derive(Deserialize)]
struct MarketInfo {
    symbol: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    bid_price: String,
    ask_price: String,
    last_price: String,
    quote_volume: String,
    price_change_percent: String,
}
