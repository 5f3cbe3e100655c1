use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::market_data::OhlcvQuery;
use crate::market_data::connectors::SourceAdapter;
use crate::market_data::connectors::http::{build_client, endpoint, get_json};
use crate::types::{normalize_candles, Candle, Ticker, Timeframe};
use crate::utils::helper::current_timestamp_ms;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DAY_MS: u64 = 86_400_000;

/// Yahoo has no symbol directory endpoint; these are served without a lookup.
const KNOWN_SYMBOLS: &[&str] = &[
    // Indices
    "^GSPC", "^DJI", "^IXIC", "^RUT", "^VIX",
    // Stocks
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA",
    "JPM", "V", "JNJ", "WMT", "PG", "UNH", "HD", "MA",
    // ETFs
    "SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "EEM", "GLD",
    "BITO", "BTF", "XBTF",
    // Spot crypto
    "BTC-USD", "ETH-USD",
];

pub struct YahooSource {
    source_id: String,
    base_url: String,
    client: Client,
    connected: AtomicBool,
}

impl YahooSource {
    pub fn new(base_url: Option<&str>, request_timeout: Duration) -> Self {
        YahooSource {
            source_id: "yahoo".to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            client: build_client(request_timeout),
            connected: AtomicBool::new(false),
        }
    }

    fn interval(&self, timeframe: Timeframe) -> Result<&'static str> {
        match timeframe {
            Timeframe::OneMinute => Ok("1m"),
            Timeframe::FiveMinutes => Ok("5m"),
            Timeframe::FifteenMinutes => Ok("15m"),
            Timeframe::ThirtyMinutes => Ok("30m"),
            Timeframe::OneHour => Ok("60m"),
            Timeframe::OneDay => Ok("1d"),
            Timeframe::OneWeek => Ok("1wk"),
            Timeframe::OneMonth => Ok("1mo"),
            Timeframe::FourHours => Err(Error::UnsupportedTimeframe {
                source_name: self.source_id.clone(),
                timeframe: timeframe.to_string(),
            }),
        }
    }

    async fn chart(&self, symbol: &str, params: &[(&str, String)]) -> Result<ChartResult> {
        let path = format!("v8/finance/chart/{}", symbol.replace('^', "%5E"));
        let response: ChartResponse =
            get_json(&self.client, &self.source_id, &endpoint(&self.base_url, &path), params).await?;

        if let Some(error) = response.chart.error {
            return Err(Error::unavailable(
                &self.source_id,
                format!("{}: {}", error.code, error.description),
            ));
        }
        response
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| Error::EmptyResult { source_name: self.source_id.clone() })
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
impl SourceAdapter for YahooSource {
    fn name(&self) -> &str {
        &self.source_id
    }

    /// No credentials; a one-day chart for a known ticker proves reachability.
    async fn connect(&self) -> bool {
        let params = [("range", "1d".to_string()), ("interval", "1d".to_string())];
        match self.chart("AAPL", &params).await {
            Ok(_) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!("Connected to Yahoo Finance");
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!("Failed to connect to Yahoo Finance: {}", e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from Yahoo Finance");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        KNOWN_SYMBOLS.contains(&symbol)
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>> {
        let interval = self.interval(query.timeframe)?;
        self.ensure_connected().await?;

        let (start, end) = chart_window(query, current_timestamp_ms());
        let params = [
            ("period1", (start / 1000).to_string()),
            ("period2", (end / 1000).to_string()),
            ("interval", interval.to_string()),
            ("includePrePost", "true".to_string()),
        ];
        let result = self.chart(&query.symbol, &params).await?;

        let mut candles = normalize_candles(result.candles());
        if let Some(limit) = query.limit {
            if candles.len() > limit {
                candles.drain(..candles.len() - limit);
            }
        }
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure_connected().await?;
        let params = [("range", "5d".to_string()), ("interval", "1d".to_string())];
        let meta = self.chart(symbol, &params).await?.meta;

        let last = meta
            .regular_market_price
            .ok_or_else(|| Error::EmptyResult { source_name: self.source_id.clone() })?;
        let previous = meta.chart_previous_close.or(meta.previous_close).unwrap_or(0.0);
        Ok(Ticker {
            bid: last,
            ask: last,
            last,
            volume: meta.regular_market_volume.unwrap_or(0.0),
            change_pct: Ticker::change_from_open(previous, last),
        })
    }
}

/// Epoch-ms bounds for a chart request. Explicit bounds win; otherwise
/// `limit` bars back from the end, else 90 days for daily and wider
/// timeframes and 5 days intraday.
fn chart_window(query: &OhlcvQuery, now: u64) -> (u64, u64) {
    let end = query.end.unwrap_or(now);
    let start = query.start.unwrap_or_else(|| {
        let span = match query.limit {
            Some(limit) => query.timeframe.millis() * limit as u64,
            None if query.timeframe.millis() >= DAY_MS => 90 * DAY_MS,
            None => 5 * DAY_MS,
        };
        end.saturating_sub(span)
    });
    (start, end)
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    /// Bar open times in epoch seconds.
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_volume: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResult {
    /// Yahoo pads halted bars with nulls; rows missing any price are skipped.
    fn candles(&self) -> Vec<Candle> {
        let Some(quote) = self.indicators.quote.first() else {
            return Vec::new();
        };
        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, &secs)| {
                let at = |series: &[Option<f64>]| series.get(i).copied().flatten();
                Some(Candle {
                    timestamp: u64::try_from(secs).ok()? * 1000,
                    open: at(&quote.open)?,
                    high: at(&quote.high)?,
                    low: at(&quote.low)?,
                    close: at(&quote.close)?,
                    volume: at(&quote.volume).unwrap_or(0.0),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::FetchRequest;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chart_body(meta: Value, timestamps: Value, quote: Value) -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": meta,
                    "timestamp": timestamps,
                    "indicators": {"quote": [quote]}
                }],
                "error": null
            }
        })
    }

    async fn server_accepting_connect() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .and(query_param("range", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart_body(
                json!({"regularMarketPrice": 190.0}),
                json!([]),
                json!({}),
            )))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_null_rows_are_skipped_and_tail_kept() {
        let server = server_accepting_connect().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/MSFT"))
            .and(query_param("interval", "60m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart_body(
                json!({}),
                json!([1704067200, 1704070800, 1704074400, 1704078000]),
                json!({
                    "open": [10.0, 11.0, 12.0, 13.0],
                    "high": [11.0, 12.0, 13.0, 14.0],
                    "low": [9.0, 10.0, 11.0, 12.0],
                    "close": [10.5, null, 12.5, 13.5],
                    "volume": [100, 200, null, 400]
                }),
            )))
            .mount(&server)
            .await;

        let source = YahooSource::new(Some(&server.uri()), Duration::from_secs(2));
        let query = FetchRequest::new("MSFT", Timeframe::OneHour)
            .with_limit(2)
            .query_for("MSFT".into());

        let candles = source.fetch_ohlcv(&query).await.unwrap();
        let stamps: Vec<u64> = candles.iter().map(|c| c.timestamp).collect();
        assert_eq!(stamps, vec![1_704_074_400_000, 1_704_078_000_000]);
        assert_eq!(candles[0].volume, 0.0);
        assert_eq!(candles[1].close, 13.5);
        assert!(source.is_connected());
    }

    #[tokio::test]
    async fn test_ticker_change_is_against_previous_close() {
        let server = server_accepting_connect().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/SPY"))
            .and(query_param("range", "5d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart_body(
                json!({"regularMarketPrice": 110.0, "chartPreviousClose": 100.0, "regularMarketVolume": 5000}),
                json!([]),
                json!({}),
            )))
            .mount(&server)
            .await;

        let source = YahooSource::new(Some(&server.uri()), Duration::from_secs(2));
        let ticker = source.fetch_ticker("SPY").await.unwrap();
        assert_eq!(ticker.last, 110.0);
        assert_eq!(ticker.bid, 110.0);
        assert_eq!(ticker.volume, 5000.0);
        assert_eq!(ticker.change_pct, 10.0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_unavailable() {
        let server = server_accepting_connect().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/NOPE"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}
            })))
            .mount(&server)
            .await;

        let source = YahooSource::new(Some(&server.uri()), Duration::from_secs(2));
        let query = FetchRequest::new("NOPE", Timeframe::OneDay).query_for("NOPE".into());
        let err = source.fetch_ohlcv(&query).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_four_hours_fails_without_request() {
        let source = YahooSource::new(Some("http://127.0.0.1:9"), Duration::from_millis(100));
        let query = FetchRequest::new("AAPL", Timeframe::FourHours).query_for("AAPL".into());
        let err = source.fetch_ohlcv(&query).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedTimeframe { .. }));
    }

    #[test]
    fn test_chart_window_defaults() {
        let now = 1_000 * DAY_MS;

        let daily = FetchRequest::new("AAPL", Timeframe::OneDay).query_for("AAPL".into());
        assert_eq!(chart_window(&daily, now), (now - 90 * DAY_MS, now));

        let intraday = FetchRequest::new("AAPL", Timeframe::FiveMinutes).query_for("AAPL".into());
        assert_eq!(chart_window(&intraday, now), (now - 5 * DAY_MS, now));

        let limited = FetchRequest::new("AAPL", Timeframe::OneHour)
            .with_limit(24)
            .query_for("AAPL".into());
        assert_eq!(chart_window(&limited, now), (now - DAY_MS, now));

        let bounded = FetchRequest::new("AAPL", Timeframe::OneHour)
            .with_range(Some(5), Some(10))
            .query_for("AAPL".into());
        assert_eq!(chart_window(&bounded, now), (5, 10));
    }
}
