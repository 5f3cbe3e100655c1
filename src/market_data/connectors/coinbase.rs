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
use crate::types::{normalize_candles, Candle, Ticker, Timeframe};
use crate::utils::helper::iso_from_millis;

pub const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";
const MAX_LIMIT: usize = 300;

pub struct CoinbaseSource {
    source_id: String,
    base_url: String,
    client: Client,
    connected: AtomicBool,
    products: RwLock<HashSet<String>>,
}

impl CoinbaseSource {
    pub fn new(base_url: Option<&str>, request_timeout: Duration) -> Self {
        CoinbaseSource {
            source_id: "coinbase".to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            client: build_client(request_timeout),
            connected: AtomicBool::new(false),
            products: RwLock::new(HashSet::new()),
        }
    }

    /// Candle width in seconds; Coinbase only serves a fixed set.
    fn granularity(&self, timeframe: Timeframe) -> Result<u64> {
        match timeframe {
            Timeframe::OneMinute => Ok(60),
            Timeframe::FiveMinutes => Ok(300),
            Timeframe::FifteenMinutes => Ok(900),
            Timeframe::OneHour => Ok(3600),
            Timeframe::OneDay => Ok(86400),
            other => Err(Error::UnsupportedTimeframe {
                source_name: self.source_id.clone(),
                timeframe: other.to_string(),
            }),
        }
    }

    async fn load_products(&self) -> Result<usize> {
        let products: Vec<Product> = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, "products"),
            &[] as &[(&str, &str)],
        )
        .await?;

        let online: HashSet<String> = products
            .into_iter()
            .filter(|p| p.status == "online" && !p.trading_disabled)
            .map(|p| p.id)
            .collect();
        let count = online.len();

        *self.products.write().unwrap_or_else(|e| e.into_inner()) = online;
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
impl SourceAdapter for CoinbaseSource {
    fn name(&self) -> &str {
        &self.source_id
    }

    async fn connect(&self) -> bool {
        match self.load_products().await {
            Ok(count) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!("Connected to Coinbase ({} products)", count);
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!("Failed to connect to Coinbase: {}", e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from Coinbase");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        self.products
            .read()
            .map(|products| products.contains(symbol))
            .unwrap_or(false)
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>> {
        let granularity = self.granularity(query.timeframe)?;
        self.ensure_connected().await?;

        let limit = query.effective_limit(MAX_LIMIT, MAX_LIMIT);
        let mut params: Vec<(&str, String)> = vec![("granularity", granularity.to_string())];
        match (query.start, query.end) {
            (Some(start), end) => {
                let end = end.unwrap_or(start + granularity * 1000 * limit as u64);
                params.push(("start", iso_from_millis(start)));
                params.push(("end", iso_from_millis(end)));
            }
            (None, Some(end)) => {
                let start = end.saturating_sub(granularity * 1000 * limit as u64);
                params.push(("start", iso_from_millis(start)));
                params.push(("end", iso_from_millis(end)));
            }
            (None, None) => {}
        }

        let path = format!("products/{}/candles", query.symbol);
        let rows: Vec<Vec<Value>> =
            get_json(&self.client, &self.source_id, &endpoint(&self.base_url, &path), &params).await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            candles.push(parse_candle(row).ok_or_else(|| {
                Error::DeserializationError(format!("coinbase: malformed candle {:?}", row))
            })?);
        }

        // Coinbase answers newest first and ignores row limits.
        let mut candles = normalize_candles(candles);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure_connected().await?;
        let no_params: &[(&str, &str)] = &[];

        let book: ProductTicker = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, &format!("products/{}/ticker", symbol)),
            no_params,
        )
        .await?;
        let stats: ProductStats = get_json(
            &self.client,
            &self.source_id,
            &endpoint(&self.base_url, &format!("products/{}/stats", symbol)),
            no_params,
        )
        .await?;

        let last = book.price.parse().unwrap_or(0.0);
        let open = stats.open.parse().unwrap_or(0.0);
        Ok(Ticker {
            bid: book.bid.parse().unwrap_or(0.0),
            ask: book.ask.parse().unwrap_or(0.0),
            last,
            volume: book.volume.parse().unwrap_or(0.0),
            change_pct: Ticker::change_from_open(open, last),
        })
    }
}

/// `[time_secs, low, high, open, close, volume]`
fn parse_candle(row: &[Value]) -> Option<Candle> {
    Some(Candle {
        timestamp: row.first()?.as_u64()? * 1000,
        low: parse_decimal(row.get(1)?)?,
        high: parse_decimal(row.get(2)?)?,
        open: parse_decimal(row.get(3)?)?,
        close: parse_decimal(row.get(4)?)?,
        volume: parse_decimal(row.get(5)?)?,
    })
}

#[derive(Deserialize)]
struct Product {
    id: String,
    status: String,
    #[serde(default)]
    trading_disabled: bool,
}

#[derive(Deserialize)]
struct ProductTicker {
    bid: String,
    ask: String,
    price: String,
    volume: String,
}

#[derive(Deserialize)]
struct ProductStats {
    open: String,
}
