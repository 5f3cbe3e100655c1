//! File-backed source: one CSV per symbol under a data directory.
//!
//! The uppercased file stem is the symbol. The first column holds the row
//! time; price columns are found by header name, case-insensitively.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use crate::error::{Error, Result};
use crate::market_data::OhlcvQuery;
use crate::market_data::connectors::SourceAdapter;
use crate::types::{normalize_candles, Candle, Ticker, Timeframe};

pub const DEFAULT_DATA_DIR: &str = "./data/csv";

pub struct CsvSource {
    source_id: String,
    data_dir: PathBuf,
    connected: AtomicBool,
    files: RwLock<HashMap<String, PathBuf>>,
    loaded: RwLock<HashMap<String, Arc<Vec<Candle>>>>,
}

impl CsvSource {
    pub fn new(data_dir: Option<&str>) -> Self {
        CsvSource {
            source_id: "csv".to_string(),
            data_dir: PathBuf::from(data_dir.unwrap_or(DEFAULT_DATA_DIR)),
            connected: AtomicBool::new(false),
            files: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Symbols found by the last scan, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut symbols: Vec<String> = files.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    async fn scan(&self) -> Result<usize> {
        let dir = self.data_dir.clone();
        let found = tokio::task::spawn_blocking(move || -> Result<HashMap<String, PathBuf>> {
            std::fs::create_dir_all(&dir)?;
            let mut found = HashMap::new();
            collect_csv_files(&dir, &mut found)?;
            Ok(found)
        })
        .await
        .map_err(|e| Error::unavailable(&self.source_id, e.to_string()))??;

        let count = found.len();
        *self.files.write().unwrap_or_else(|e| e.into_inner()) = found;
        Ok(count)
    }

    /// Parsed rows for `symbol`, read from disk on first use.
    async fn rows(&self, symbol: &str) -> Result<Arc<Vec<Candle>>> {
        let symbol = symbol.to_uppercase();
        if let Some(rows) = self.loaded.read().unwrap_or_else(|e| e.into_inner()).get(&symbol) {
            return Ok(rows.clone());
        }

        let path = self
            .files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol)
            .cloned()
            .ok_or_else(|| Error::unavailable(&self.source_id, format!("no CSV file for {}", symbol)))?;

        let rows = tokio::task::spawn_blocking(move || read_candles(&path))
            .await
            .map_err(|e| Error::unavailable(&self.source_id, e.to_string()))??;
        let rows = Arc::new(rows);
        tracing::info!("Loaded {} rows for {} from CSV", rows.len(), symbol);

        self.loaded
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol, rows.clone());
        Ok(rows)
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
impl SourceAdapter for CsvSource {
    fn name(&self) -> &str {
        &self.source_id
    }

    async fn connect(&self) -> bool {
        match self.scan().await {
            Ok(count) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!("CSV source initialized with {} files from {}", count, self.data_dir.display());
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!("Failed to initialize CSV source: {}", e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.loaded.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_symbol_valid(&self, symbol: &str) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(&symbol.to_uppercase()))
            .unwrap_or(false)
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>> {
        self.ensure_connected().await?;
        let rows = self.rows(&query.symbol).await?;

        let in_range: Vec<Candle> = rows
            .iter()
            .filter(|c| query.start.is_none_or(|start| c.timestamp >= start))
            .filter(|c| query.end.is_none_or(|end| c.timestamp <= end))
            .copied()
            .collect();

        let mut candles = resample(&in_range, query.timeframe);
        if let Some(limit) = query.limit {
            if candles.len() > limit {
                candles.drain(..candles.len() - limit);
            }
        }
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure_connected().await?;
        let rows = self.rows(symbol).await?;

        let last = rows
            .last()
            .ok_or_else(|| Error::EmptyResult { source_name: self.source_id.clone() })?;
        let prev = if rows.len() > 1 { &rows[rows.len() - 2] } else { last };

        Ok(Ticker {
            bid: last.close,
            ask: last.close,
            last: last.close,
            volume: last.volume,
            change_pct: Ticker::change_from_open(prev.close, last.close),
        })
    }
}

fn collect_csv_files(dir: &Path, found: &mut HashMap<String, PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_csv_files(&path, found)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
            continue;
        }
        let symbol = path.file_stem().and_then(|stem| stem.to_str()).map(str::to_uppercase);
        if let Some(symbol) = symbol {
            found.insert(symbol, path);
        }
    }
    Ok(())
}

fn read_candles(path: &Path) -> Result<Vec<Candle>> {
    let malformed = |e: csv::Error| Error::DeserializationError(format!("csv: {}: {}", path.display(), e));

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(malformed)?;
    let headers = reader.headers().map_err(malformed)?.clone();
    let columns = Columns::locate(&headers).ok_or_else(|| {
        Error::DeserializationError(format!("csv: {}: missing open/high/low/close columns", path.display()))
    })?;

    let mut candles = Vec::new();
    for record in reader.records() {
        if let Some(candle) = columns.parse(&record.map_err(malformed)?) {
            candles.push(candle);
        }
    }
    Ok(normalize_candles(candles))
}

/// Column positions; the time is always column 0.
struct Columns {
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Option<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .skip(1)
                .position(|h| h.eq_ignore_ascii_case(name))
                .map(|i| i + 1)
        };
        Some(Columns {
            open: find("open")?,
            high: find("high")?,
            low: find("low")?,
            close: find("close")?,
            volume: find("volume"),
        })
    }

    /// `None` drops the row: unreadable time or a blank or non-finite value.
    fn parse(&self, record: &StringRecord) -> Option<Candle> {
        let number = |index: usize| record.get(index)?.parse::<f64>().ok().filter(|v| v.is_finite());
        let volume = match self.volume {
            Some(index) => number(index)?,
            None => 0.0,
        };
        Some(Candle {
            timestamp: parse_timestamp(record.get(0)?)?,
            open: number(self.open)?,
            high: number(self.high)?,
            low: number(self.low)?,
            close: number(self.close)?,
            volume,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<u64> {
    let parsed: DateTime<Utc> = if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        ts.with_timezone(&Utc)
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        dt.and_utc()
    } else {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0)?.and_utc()
    };
    u64::try_from(parsed.timestamp_millis()).ok()
}

/// Bucket ascending rows into epoch-aligned `timeframe` windows: first open,
/// highest high, lowest low, last close, summed volume.
fn resample(rows: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    let width = timeframe.millis();
    let mut out: Vec<Candle> = Vec::new();
    for row in rows {
        let bucket = row.timestamp - row.timestamp % width;
        match out.last_mut() {
            Some(bar) if bar.timestamp == bucket => {
                bar.high = bar.high.max(row.high);
                bar.low = bar.low.min(row.low);
                bar.close = row.close;
                bar.volume += row.volume;
            }
            _ => out.push(Candle { timestamp: bucket, ..*row }),
        }
    }
    out
}
