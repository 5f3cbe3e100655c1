use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::Result;

pub const DEFAULT_INTERVAL: &str = "1h";

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

/// Client → server frames.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        symbol: String,
        #[serde(default = "default_interval")]
        interval: String,
    },
    Unsubscribe {
        symbol: String,
    },
    Ping,
}

/// Server → client frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        symbol: String,
        interval: String,
    },
    Unsubscribed {
        symbol: String,
    },
    Pong,
    PriceUpdate {
        symbol: String,
        interval: String,
        data: Value,
        timestamp: String,
    },
    IndicatorUpdate {
        symbol: String,
        interval: String,
        indicator: String,
        data: Value,
        timestamp: String,
    },
    Signal {
        symbol: String,
        signal: Value,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `symbol:interval`, the unit of subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub symbol: String,
    pub interval: String,
}

impl SubscriptionKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        SubscriptionKey {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.interval)
    }
}

/// Body of a `price_update`: the latest candle of a polled key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_complete: bool,
    pub source: String,
}
