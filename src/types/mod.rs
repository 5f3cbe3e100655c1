pub mod ids;
pub mod candle;
pub mod timeframe;

pub use candle::{normalize_candles, Candle, Ticker};
pub use ids::ConnectionId;
pub use timeframe::Timeframe;
