pub mod binance;
pub mod coinbase;
pub mod csv_file;
pub mod demo;
pub mod kraken;
pub mod yahoo;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

mod http;

use async_trait::async_trait;
use crate::error::Result;
use crate::market_data::OhlcvQuery;
use crate::market_data::symbols;
use crate::types::{Candle, Ticker};

pub use binance::BinanceSource;
pub use coinbase::CoinbaseSource;
pub use csv_file::CsvSource;
pub use demo::DemoSource;
pub use kraken::KrakenSource;
pub use yahoo::YahooSource;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{flat_candles, MockBehavior, MockSource};

/// One upstream quote provider.
///
/// Implementations are shared between concurrent fetches, so every method
/// takes `&self`; connection state lives behind interior mutability.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Establish the session and load the tradable-symbol set. Failures are
    /// logged by the adapter and reported as `false`.
    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Venue rendering of a canonical symbol, `None` if the venue cannot express it.
    fn render_symbol(&self, canonical: &str) -> Option<String> {
        symbols::convert_for_source(canonical, self.name())
    }

    /// Whether the venue-rendered symbol is currently tradable here.
    fn is_symbol_valid(&self, symbol: &str) -> bool;

    /// Rows ascending by timestamp, one per timestamp.
    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;
}
