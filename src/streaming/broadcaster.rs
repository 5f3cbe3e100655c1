use std::sync::Arc;
use serde_json::Value;
use crate::observability::tracing::trace_broadcast;
use crate::streaming::messages::{ServerMessage, SubscriptionKey};
use crate::streaming::registry::{DeliveryReport, SubscriptionRegistry};
use crate::utils::helper::iso_timestamp_now;

/// Pushes envelopes to subscribed connections. Failures only ever shrink
/// the registry; callers get a delivery count, never an error.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Broadcaster { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn broadcast(&self, symbol: &str, interval: &str, message: &ServerMessage) -> DeliveryReport {
        let key = SubscriptionKey::new(symbol, interval);
        let _span = trace_broadcast(&key.to_string()).entered();

        let Some(payload) = serialize(message) else {
            return DeliveryReport::default();
        };
        let report = self.registry.deliver(&key, &payload);
        if report.pruned > 0 {
            tracing::warn!("Pruned {} connections while broadcasting {}", report.pruned, key);
        }
        report
    }

    /// Deliver to every interval of `symbol`, once per connection.
    pub fn broadcast_to_symbol(&self, symbol: &str, message: &ServerMessage) -> DeliveryReport {
        let _span = trace_broadcast(symbol).entered();

        let Some(payload) = serialize(message) else {
            return DeliveryReport::default();
        };
        self.registry.deliver_to_symbol(symbol, &payload)
    }

    pub fn price_update(&self, symbol: &str, interval: &str, data: Value) -> DeliveryReport {
        let message = ServerMessage::PriceUpdate {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            data,
            timestamp: iso_timestamp_now(),
        };
        self.broadcast(symbol, interval, &message)
    }

    pub fn indicator_update(&self, symbol: &str, interval: &str, indicator: &str, data: Value) -> DeliveryReport {
        let message = ServerMessage::IndicatorUpdate {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            indicator: indicator.to_string(),
            data,
            timestamp: iso_timestamp_now(),
        };
        self.broadcast(symbol, interval, &message)
    }

    pub fn signal(&self, symbol: &str, signal: Value) -> DeliveryReport {
        let message = ServerMessage::Signal {
            symbol: symbol.to_string(),
            signal,
            timestamp: iso_timestamp_now(),
        };
        self.broadcast_to_symbol(symbol, &message)
    }
}

fn serialize(message: &ServerMessage) -> Option<Arc<str>> {
    match message.to_json() {
        Ok(json) => Some(json.into()),
        Err(e) => {
            tracing::error!("Failed to serialize broadcast: {}", e);
            None
        }
    }
}
