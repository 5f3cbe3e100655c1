//! Canonical symbol handling.
//!
//! The canonical form is `BASE-QUOTE` for pairs (`BTC-USDT`) and the bare
//! ticker for equities (`AAPL`). Venues render it their own way; a venue
//! that has no rendering for a symbol cannot serve it.

use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetClass {
    Crypto,
    Stock,
    Etf,
}

static STANDARD_SYMBOLS: LazyLock<HashMap<&'static str, AssetClass>> = LazyLock::new(|| {
    HashMap::from([
        ("BTC-USD", AssetClass::Crypto),
        ("BTC-USDT", AssetClass::Crypto),
        ("ETH-USD", AssetClass::Crypto),
        ("ETH-USDT", AssetClass::Crypto),
        ("LTC-USD", AssetClass::Crypto),
        ("BCH-USD", AssetClass::Crypto),
        ("ADA-USD", AssetClass::Crypto),
        ("DOT-USD", AssetClass::Crypto),
        ("LINK-USD", AssetClass::Crypto),
        ("SOL-USD", AssetClass::Crypto),
        ("AVAX-USD", AssetClass::Crypto),
        ("MATIC-USD", AssetClass::Crypto),
        ("UNI-USD", AssetClass::Crypto),
        ("ATOM-USD", AssetClass::Crypto),
        ("AAPL", AssetClass::Stock),
        ("GOOGL", AssetClass::Stock),
        ("MSFT", AssetClass::Stock),
        ("TSLA", AssetClass::Stock),
        ("AMZN", AssetClass::Stock),
        ("SPY", AssetClass::Etf),
        ("QQQ", AssetClass::Etf),
    ])
});

static BINANCE: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("BTC-USD", "BTCUSDT"),
        ("BTC-USDT", "BTCUSDT"),
        ("ETH-USD", "ETHUSDT"),
        ("ETH-USDT", "ETHUSDT"),
        ("LTC-USD", "LTCUSDT"),
        ("BCH-USD", "BCHUSDT"),
        ("ADA-USD", "ADAUSDT"),
        ("DOT-USD", "DOTUSDT"),
        ("LINK-USD", "LINKUSDT"),
        ("SOL-USD", "SOLUSDT"),
        ("AVAX-USD", "AVAXUSDT"),
        ("MATIC-USD", "MATICUSDT"),
        ("UNI-USD", "UNIUSDT"),
        ("ATOM-USD", "ATOMUSDT"),
    ])
});

static COINBASE: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("BTC-USD", "BTC-USD"),
        // Coinbase quotes in USD, not USDT
        ("BTC-USDT", "BTC-USD"),
        ("ETH-USD", "ETH-USD"),
        ("ETH-USDT", "ETH-USD"),
        ("LTC-USD", "LTC-USD"),
        ("BCH-USD", "BCH-USD"),
        ("ADA-USD", "ADA-USD"),
        ("DOT-USD", "DOT-USD"),
        ("LINK-USD", "LINK-USD"),
        ("ATOM-USD", "ATOM-USD"),
    ])
});

static KRAKEN: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("BTC-USD", "XBTUSD"),
        ("BTC-USDT", "XBTUSD"),
        ("ETH-USD", "ETHUSD"),
        ("ETH-USDT", "ETHUSD"),
        ("LTC-USD", "LTCUSD"),
        ("BCH-USD", "BCHUSD"),
        ("ADA-USD", "ADAUSD"),
        ("DOT-USD", "DOTUSD"),
        ("LINK-USD", "LINKUSD"),
        ("ATOM-USD", "ATOMUSD"),
    ])
});

static YAHOO: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("BTC-USD", "BTC-USD"),
        ("BTC-USDT", "BTC-USD"),
        ("ETH-USD", "ETH-USD"),
        ("ETH-USDT", "ETH-USD"),
        ("AAPL", "AAPL"),
        ("GOOGL", "GOOGL"),
        ("MSFT", "MSFT"),
        ("TSLA", "TSLA"),
        ("AMZN", "AMZN"),
        ("SPY", "SPY"),
        ("QQQ", "QQQ"),
    ])
});

/// Quote currencies recognised at the end of concatenated symbols, longest
/// alternatives first so `USDT` wins over `USD`.
const COMMON_QUOTES: &[&str] = &["USDT", "BUSD", "USDC", "USD", "BTC", "ETH", "BNB"];

fn venue_table(source: &str) -> Option<&'static HashMap<&'static str, &'static str>> {
    match source {
        "binance" => Some(&*BINANCE),
        "coinbase" => Some(&*COINBASE),
        "kraken" => Some(&*KRAKEN),
        "yahoo" => Some(&*YAHOO),
        _ => None,
    }
}

/// Convert any accepted notation to the canonical form.
///
/// - `btc/usdt` -> `BTC-USDT`
/// - `BTCUSDT` -> `BTC-USDT`
/// - `XBTUSD` -> `BTC-USD` (venue rendering)
/// - `AAPL` -> `AAPL`
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();

    if STANDARD_SYMBOLS.contains_key(symbol.as_str()) {
        return symbol;
    }

    if symbol.contains('/') {
        return symbol.replace('/', "-");
    }

    if symbol.contains('-') {
        return symbol;
    }

    if let Some(reversed) = reverse_venue_lookup(&symbol) {
        return reversed;
    }

    if let Some(split) = split_concatenated(&symbol) {
        return split;
    }

    if is_plain_ticker(&symbol) {
        return symbol;
    }

    tracing::warn!("Could not normalize symbol: {}", symbol);
    symbol
}

/// Venue rendering of a canonical symbol, or `None` when the venue has no
/// mapping for it. Venues without a table accept the canonical form as is.
pub fn convert_for_source(canonical: &str, source: &str) -> Option<String> {
    match venue_table(source) {
        Some(table) => table.get(canonical).map(|s| s.to_string()),
        None => Some(canonical.to_string()),
    }
}

pub fn asset_class(canonical: &str) -> Option<AssetClass> {
    STANDARD_SYMBOLS.get(canonical).copied()
}

/// Slash display form for pairs, bare ticker otherwise.
pub fn display_format(canonical: &str) -> String {
    match asset_class(canonical) {
        Some(AssetClass::Crypto) => canonical.replace('-', "/"),
        _ => canonical.to_string(),
    }
}

fn reverse_venue_lookup(symbol: &str) -> Option<String> {
    // Binance's table is checked last: its concatenated forms are better
    // recovered by splitting, which keeps USDT quotes intact.
    let tables: [&'static HashMap<&'static str, &'static str>; 2] = [&*KRAKEN, &*COINBASE];
    for table in tables {
        let mut matches: Vec<&'static str> = table
            .iter()
            .filter(|(_, venue)| **venue == symbol)
            .map(|(canonical, _)| *canonical)
            .collect();
        // Several canonical symbols can share a rendering; prefer the shortest (USD over USDT).
        matches.sort_by_key(|c| (c.len(), *c));
        if let Some(canonical) = matches.first() {
            return Some(canonical.to_string());
        }
    }
    None
}

fn split_concatenated(symbol: &str) -> Option<String> {
    COMMON_QUOTES.iter().find_map(|quote| {
        symbol
            .strip_suffix(quote)
            .filter(|base| base.len() >= 2)
            .map(|base| format!("{}-{}", base, quote))
    })
}

fn is_plain_ticker(symbol: &str) -> bool {
    (1..=5).contains(&symbol.len()) && symbol.chars().all(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_notations() {
        assert_eq!(normalize_symbol("btc/usdt"), "BTC-USDT");
        assert_eq!(normalize_symbol("BTCUSDT"), "BTC-USDT");
        assert_eq!(normalize_symbol(" eth-usd "), "ETH-USD");
        assert_eq!(normalize_symbol("XBTUSD"), "BTC-USD");
        assert_eq!(normalize_symbol("AAPL"), "AAPL");
        assert_eq!(normalize_symbol("SOLUSDC"), "SOL-USDC");
    }

    #[test]
    fn test_convert_for_source() {
        assert_eq!(convert_for_source("BTC-USDT", "binance").as_deref(), Some("BTCUSDT"));
        assert_eq!(convert_for_source("BTC-USDT", "coinbase").as_deref(), Some("BTC-USD"));
        assert_eq!(convert_for_source("BTC-USD", "kraken").as_deref(), Some("XBTUSD"));
        assert_eq!(convert_for_source("AAPL", "binance"), None);
        assert_eq!(convert_for_source("AAPL", "demo").as_deref(), Some("AAPL"));
        assert_eq!(convert_for_source("BTC-USDT", "yahoo").as_deref(), Some("BTC-USD"));
        assert_eq!(convert_for_source("SPY", "yahoo").as_deref(), Some("SPY"));
        assert_eq!(convert_for_source("SOL-USD", "yahoo"), None);
        // Files are named by canonical symbol.
        assert_eq!(convert_for_source("BTC-USDT", "csv").as_deref(), Some("BTC-USDT"));
    }

    #[test]
    fn test_display_format() {
        assert_eq!(display_format("ETH-USD"), "ETH/USD");
        assert_eq!(display_format("SPY"), "SPY");
    }
}
