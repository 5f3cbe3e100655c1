//! Connection ⇄ subscription index.
//!
//! Both directions live behind one mutex, so every mutation (including the
//! prune that follows a failed send) updates them together.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::mpsc;
use crate::error::{Error, Result};
use crate::observability::metrics::{ACTIVE_CONNECTIONS, CONNECTIONS_PRUNED, MESSAGES_DELIVERED};
use crate::streaming::messages::{ServerMessage, SubscriptionKey};
use crate::types::ConnectionId;

/// Pre-serialized frames queued for one connection's writer.
pub type Outbound = mpsc::Receiver<Arc<str>>;

struct Connection {
    sender: mpsc::Sender<Arc<str>>,
    keys: HashSet<SubscriptionKey>,
}

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, Connection>,
    subscribers: HashMap<SubscriptionKey, HashSet<ConnectionId>>,
}

impl Index {
    /// Drop `key` from `id`'s bucket, removing the bucket once empty.
    fn detach(&mut self, key: &SubscriptionKey, id: &ConnectionId) {
        if let Some(bucket) = self.subscribers.get_mut(key) {
            bucket.remove(id);
            if bucket.is_empty() {
                self.subscribers.remove(key);
            }
        }
    }

    fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(id) else {
            return false;
        };
        for key in &connection.keys {
            self.detach(key, id);
        }
        ACTIVE_CONNECTIONS.dec();
        true
    }

    /// Enqueue without waiting. A closed or full queue is a send failure.
    fn try_send(&self, id: &ConnectionId, payload: &Arc<str>) -> Result<()> {
        let connection = self
            .connections
            .get(id)
            .ok_or(Error::ConnectionSendFailure(*id))?;
        connection
            .sender
            .try_send(payload.clone())
            .map_err(|_| Error::ConnectionSendFailure(*id))
    }

    fn deliver(&mut self, targets: Vec<ConnectionId>, payload: &Arc<str>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for id in targets {
            match self.try_send(&id, payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("{}; removing connection", e);
                    if self.remove_connection(&id) {
                        CONNECTIONS_PRUNED.inc();
                        report.pruned += 1;
                    }
                }
            }
        }
        MESSAGES_DELIVERED.inc_by(report.delivered as u64);
        report
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub pruned: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub total_subscriptions: usize,
    pub symbols_monitored: usize,
    pub subscriptions_by_symbol: BTreeMap<String, usize>,
}

pub struct SubscriptionRegistry {
    index: Mutex<Index>,
    queue_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        SubscriptionRegistry {
            index: Mutex::new(Index::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a new connection; the receiver feeds its socket writer.
    pub fn register(&self) -> (ConnectionId, Outbound) {
        let id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(self.queue_capacity);

        let mut index = self.lock();
        index.connections.insert(id, Connection { sender, keys: HashSet::new() });
        ACTIVE_CONNECTIONS.inc();
        tracing::info!(
            "Client {} connected. Total connections: {}",
            id.short(),
            index.connections.len()
        );
        (id, receiver)
    }

    /// Idempotent. False if the connection is no longer registered.
    pub fn subscribe(&self, id: ConnectionId, symbol: &str, interval: &str) -> bool {
        let key = SubscriptionKey::new(symbol, interval);
        let mut index = self.lock();

        let Some(connection) = index.connections.get_mut(&id) else {
            return false;
        };
        connection.keys.insert(key.clone());
        index.subscribers.entry(key.clone()).or_default().insert(id);

        tracing::info!("Client {} subscribed to {}", id.short(), key);
        true
    }

    /// Remove every interval of `symbol` held by `id`; returns how many keys went.
    pub fn unsubscribe(&self, id: ConnectionId, symbol: &str) -> usize {
        let mut index = self.lock();

        let removed: Vec<SubscriptionKey> = match index.connections.get_mut(&id) {
            Some(connection) => {
                let matching: Vec<SubscriptionKey> = connection
                    .keys
                    .iter()
                    .filter(|key| key.symbol == symbol)
                    .cloned()
                    .collect();
                for key in &matching {
                    connection.keys.remove(key);
                }
                matching
            }
            None => return 0,
        };

        for key in &removed {
            index.detach(key, &id);
        }

        tracing::info!("Client {} unsubscribed from {}", id.short(), symbol);
        removed.len()
    }

    /// Remove the connection and all of its subscriptions.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut index = self.lock();
        let removed = index.remove_connection(&id);
        if removed {
            tracing::info!(
                "Client {} disconnected. Total connections: {}",
                id.short(),
                index.connections.len()
            );
        }
        removed
    }

    /// Drop every connection. Their writers see the queue close and shut
    /// the sockets.
    pub fn disconnect_all(&self) -> usize {
        let mut index = self.lock();
        let count = index.connections.len();
        index.connections.clear();
        index.subscribers.clear();
        ACTIVE_CONNECTIONS.sub(count as i64);
        tracing::info!("Disconnected {} clients", count);
        count
    }

    /// Queue a frame for one connection; on failure the connection is removed.
    pub fn send(&self, id: ConnectionId, message: &ServerMessage) -> Result<()> {
        let payload: Arc<str> = message.to_json()?.into();
        let mut index = self.lock();
        if let Err(e) = index.try_send(&id, &payload) {
            if index.remove_connection(&id) {
                CONNECTIONS_PRUNED.inc();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Fan a frame out to the exact key's subscribers.
    pub fn deliver(&self, key: &SubscriptionKey, payload: &Arc<str>) -> DeliveryReport {
        let mut index = self.lock();
        let targets: Vec<ConnectionId> = match index.subscribers.get(key) {
            Some(bucket) => bucket.iter().copied().collect(),
            None => return DeliveryReport::default(),
        };
        index.deliver(targets, payload)
    }

    /// Fan a frame out to every subscriber of any interval of `symbol`,
    /// once per connection.
    pub fn deliver_to_symbol(&self, symbol: &str, payload: &Arc<str>) -> DeliveryReport {
        let mut index = self.lock();
        let targets: HashSet<ConnectionId> = index
            .subscribers
            .iter()
            .filter(|(key, _)| key.symbol == symbol)
            .flat_map(|(_, bucket)| bucket.iter().copied())
            .collect();
        if targets.is_empty() {
            return DeliveryReport::default();
        }
        index.deliver(targets.into_iter().collect(), payload)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn keys_of(&self, id: ConnectionId) -> Option<Vec<SubscriptionKey>> {
        let index = self.lock();
        let connection = index.connections.get(&id)?;
        let mut keys: Vec<SubscriptionKey> = connection.keys.iter().cloned().collect();
        keys.sort();
        Some(keys)
    }

    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.lock().subscribers.get(key).map_or(0, HashSet::len)
    }

    /// Keys with at least one subscriber, sorted.
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.lock().subscribers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> RegistryStats {
        let index = self.lock();
        RegistryStats {
            total_connections: index.connections.len(),
            total_subscriptions: index.connections.values().map(|c| c.keys.len()).sum(),
            symbols_monitored: index.subscribers.len(),
            subscriptions_by_symbol: index
                .subscribers
                .iter()
                .map(|(key, bucket)| (key.to_string(), bucket.len()))
                .collect(),
        }
    }

    /// Whether both directions of the index agree and no bucket is empty.
    pub fn is_consistent(&self) -> bool {
        let index = self.lock();

        let forward = index.connections.iter().all(|(id, connection)| {
            connection
                .keys
                .iter()
                .all(|key| index.subscribers.get(key).is_some_and(|bucket| bucket.contains(id)))
        });
        let reverse = index.subscribers.iter().all(|(key, bucket)| {
            !bucket.is_empty()
                && bucket.iter().all(|id| {
                    index
                        .connections
                        .get(id)
                        .is_some_and(|connection| connection.keys.contains(key))
                })
        });
        forward && reverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Arc<str> {
        Arc::from(text)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new(8);
        let (id, _rx) = registry.register();

        assert!(registry.subscribe(id, "BTC-USDT", "1h"));
        assert!(registry.subscribe(id, "BTC-USDT", "1h"));

        let stats = registry.stats();
        assert_eq!(stats.total_subscriptions, 1);
        assert_eq!(stats.subscriptions_by_symbol.get("BTC-USDT:1h"), Some(&1));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_unsubscribe_removes_every_interval_and_empty_buckets() {
        let registry = SubscriptionRegistry::new(8);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();

        registry.subscribe(a, "BTC-USDT", "1h");
        registry.subscribe(a, "BTC-USDT", "4h");
        registry.subscribe(a, "ETH-USDT", "1h");
        registry.subscribe(b, "BTC-USDT", "1h");

        assert_eq!(registry.unsubscribe(a, "BTC-USDT"), 2);
        assert_eq!(registry.keys_of(a).unwrap(), vec![SubscriptionKey::new("ETH-USDT", "1h")]);
        assert_eq!(registry.subscriber_count(&SubscriptionKey::new("BTC-USDT", "1h")), 1);
        assert!(!registry.active_keys().contains(&SubscriptionKey::new("BTC-USDT", "4h")));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_failed_send_prunes_connection_everywhere() {
        let registry = SubscriptionRegistry::new(8);
        let (alive, mut alive_rx) = registry.register();
        let (dead, dead_rx) = registry.register();
        drop(dead_rx);

        for id in [alive, dead] {
            registry.subscribe(id, "BTC-USDT", "1h");
        }
        registry.subscribe(dead, "ETH-USDT", "1d");

        let key = SubscriptionKey::new("BTC-USDT", "1h");
        let report = registry.deliver(&key, &payload("one"));
        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert!(!registry.contains(dead));
        assert!(registry.active_keys().iter().all(|k| k.symbol != "ETH-USDT"));
        assert!(registry.is_consistent());

        let report = registry.deliver(&key, &payload("two"));
        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 0 });
        assert_eq!(alive_rx.try_recv().unwrap().as_ref(), "one");
        assert_eq!(alive_rx.try_recv().unwrap().as_ref(), "two");
    }

    #[test]
    fn test_full_queue_counts_as_failure() {
        let registry = SubscriptionRegistry::new(1);
        let (id, _rx) = registry.register();
        registry.subscribe(id, "BTC-USDT", "1m");

        let key = SubscriptionKey::new("BTC-USDT", "1m");
        assert_eq!(registry.deliver(&key, &payload("a")).delivered, 1);
        assert_eq!(registry.deliver(&key, &payload("b")).pruned, 1);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_symbol_delivery_is_once_per_connection() {
        let registry = SubscriptionRegistry::new(8);
        let (id, mut rx) = registry.register();
        registry.subscribe(id, "BTC-USDT", "1h");
        registry.subscribe(id, "BTC-USDT", "4h");
        registry.subscribe(id, "BTC-USDTX", "1h");

        let report = registry.deliver_to_symbol("BTC-USDT", &payload("signal"));
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_pruned_connection_fails() {
        let registry = SubscriptionRegistry::new(8);
        let (id, rx) = registry.register();
        drop(rx);

        let err = registry.send(id, &ServerMessage::Pong).unwrap_err();
        assert!(matches!(err, Error::ConnectionSendFailure(failed) if failed == id));
        assert!(!registry.contains(id));
        assert!(!registry.subscribe(id, "BTC-USDT", "1h"));
    }

    #[test]
    fn test_disconnect_all() {
        let registry = SubscriptionRegistry::new(8);
        let (a, _rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        registry.subscribe(a, "BTC-USDT", "1h");

        assert_eq!(registry.disconnect_all(), 2);
        assert_eq!(registry.stats(), RegistryStats::default());
        assert!(rx_b.try_recv().is_err());
    }
}
