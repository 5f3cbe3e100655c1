use std::sync::Arc;
use serde_json::{json, Value};
use market_relay::streaming::{Broadcaster, SubscriptionKey, SubscriptionRegistry};

fn frames(rx: &mut market_relay::streaming::registry::Outbound) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

#[test]
fn test_broadcast_reaches_only_the_exact_key() {
    let registry = Arc::new(SubscriptionRegistry::new(16));
    let broadcaster = Broadcaster::new(registry.clone());
    let (c, mut rx) = registry.register();
    registry.subscribe(c, "SYM", "1h");

    broadcaster.price_update("SYM", "1h", json!({"close": 1}));
    broadcaster.price_update("SYM", "4h", json!({"close": 2}));

    let received = frames(&mut rx);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["interval"], "1h");
}

#[test]
fn test_unsubscribe_silences_every_interval() {
    let registry = Arc::new(SubscriptionRegistry::new(16));
    let broadcaster = Broadcaster::new(registry.clone());
    let (c, mut rx) = registry.register();
    for interval in ["1m", "1h", "1d"] {
        registry.subscribe(c, "SYM", interval);
    }

    registry.unsubscribe(c, "SYM");
    for interval in ["1m", "1h", "1d"] {
        assert_eq!(broadcaster.price_update("SYM", interval, json!({})).delivered, 0);
    }
    broadcaster.signal("SYM", json!({"action": "buy"}));

    assert!(frames(&mut rx).is_empty());
    assert!(registry.active_keys().is_empty());
}

#[test]
fn test_failed_connection_is_not_retried() {
    let registry = Arc::new(SubscriptionRegistry::new(16));
    let broadcaster = Broadcaster::new(registry.clone());
    let (dead, dead_rx) = registry.register();
    let (alive, mut alive_rx) = registry.register();
    registry.subscribe(dead, "SYM", "1h");
    registry.subscribe(dead, "OTHER", "1d");
    registry.subscribe(alive, "SYM", "1h");
    drop(dead_rx);

    let first = broadcaster.price_update("SYM", "1h", json!({"n": 1}));
    assert_eq!((first.delivered, first.pruned), (1, 1));
    assert_eq!(registry.keys_of(dead), None);
    assert_eq!(registry.subscriber_count(&SubscriptionKey::new("OTHER", "1d")), 0);

    let second = broadcaster.price_update("SYM", "1h", json!({"n": 2}));
    assert_eq!((second.delivered, second.pruned), (1, 0));
    assert_eq!(frames(&mut alive_rx).len(), 2);
    assert!(registry.is_consistent());
}

#[test]
fn test_per_connection_order_is_preserved() {
    let registry = Arc::new(SubscriptionRegistry::new(64));
    let broadcaster = Broadcaster::new(registry.clone());
    let (c, mut rx) = registry.register();
    registry.subscribe(c, "SYM", "1m");

    for n in 0..20 {
        broadcaster.price_update("SYM", "1m", json!({ "n": n }));
    }

    let order: Vec<i64> = frames(&mut rx).iter().map(|f| f["data"]["n"].as_i64().unwrap()).collect();
    assert_eq!(order, (0..20).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_index_stays_consistent_under_concurrent_mutation() {
    let registry = Arc::new(SubscriptionRegistry::new(4));
    let broadcaster = Broadcaster::new(registry.clone());
    let symbols = ["AAA", "BBB", "CCC"];
    let intervals = ["1m", "1h", "4h"];

    let mut workers = Vec::new();
    for worker in 0..16usize {
        let registry = registry.clone();
        workers.push(tokio::spawn(async move {
            let mut undrained = Vec::new();
            for round in 0..50usize {
                let (id, rx) = registry.register();
                for (i, symbol) in symbols.iter().enumerate() {
                    registry.subscribe(id, symbol, intervals[(worker + round + i) % intervals.len()]);
                }
                match (worker + round) % 4 {
                    0 => {
                        registry.unsubscribe(id, symbols[round % symbols.len()]);
                    }
                    1 => {
                        registry.disconnect(id);
                    }
                    2 => drop(rx),
                    // Never drained: the queue fills and a broadcast prunes it.
                    _ => undrained.push(rx),
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let producer = {
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            for n in 0..500usize {
                let symbol = symbols[n % symbols.len()];
                broadcaster.price_update(symbol, intervals[n % intervals.len()], json!({ "n": n }));
                broadcaster.signal(symbol, json!({ "n": n }));
                tokio::task::yield_now().await;
            }
        })
    };

    for worker in workers {
        worker.await.unwrap();
    }
    producer.await.unwrap();

    assert!(registry.is_consistent());
    let stats = registry.stats();
    assert_eq!(stats.symbols_monitored, registry.active_keys().len());
    assert_eq!(
        stats.total_subscriptions,
        stats.subscriptions_by_symbol.values().sum::<usize>()
    );
}
