use std::sync::Arc;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use market_relay::api::rest::create_router;
use market_relay::cache::CacheManager;
use market_relay::config::{AppConfig, CacheBackendKind};
use market_relay::context::AppContext;
use market_relay::market_data::SourceRegistry;
use market_relay::market_data::connectors::DemoSource;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (Arc<AppContext>, String) {
    let mut config = AppConfig::default();
    config.cache.backend = CacheBackendKind::Memory;
    let cache = CacheManager::from_config(&config.cache).unwrap();
    let sources = SourceRegistry::new().with(Arc::new(DemoSource::new()));
    let ctx = Arc::new(AppContext::assemble(config, cache, sources));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let router = create_router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (ctx, url)
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_subscribe_ack_then_price_update() {
    let (ctx, url) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, json!({"type": "subscribe", "symbol": "BTC-USDT", "interval": "1m"})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"type": "subscribed", "symbol": "BTC-USDT", "interval": "1m"})
    );

    let report = ctx.broadcaster.price_update("BTC-USDT", "1m", json!({"close": 101.5}));
    assert_eq!(report.delivered, 1);

    let update = recv(&mut client).await;
    assert_eq!(update["type"], "price_update");
    assert_eq!(update["symbol"], "BTC-USDT");
    assert_eq!(update["data"]["close"], 101.5);
    assert!(update["timestamp"].is_string());
}

#[tokio::test]
async fn test_ping_default_interval_and_unsubscribe() {
    let (ctx, url) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "pong"}));

    send(&mut client, json!({"type": "subscribe", "symbol": "ETH-USDT"})).await;
    assert_eq!(recv(&mut client).await["interval"], "1h");

    send(&mut client, json!({"type": "unsubscribe", "symbol": "ETH-USDT"})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"type": "unsubscribed", "symbol": "ETH-USDT"})
    );
    assert_eq!(ctx.registry.stats().total_subscriptions, 0);
}

#[tokio::test]
async fn test_malformed_frames_get_an_error_and_keep_the_session() {
    let (_ctx, url) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    client.send(Message::Text("{not json".into())).await.unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply["type"], "error");

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn test_closing_the_socket_removes_the_connection() {
    let (ctx, url) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, json!({"type": "subscribe", "symbol": "SOL-USDT", "interval": "5m"})).await;
    recv(&mut client).await;
    assert_eq!(ctx.registry.connection_count(), 1);

    client.close(None).await.unwrap();
    wait_until(|| ctx.registry.connection_count() == 0).await;
    assert!(ctx.registry.active_keys().is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let (ctx, url) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, json!({"type": "ping"})).await;
    recv(&mut client).await;

    ctx.shutdown().await;

    let next = tokio::time::timeout(Duration::from_secs(5), client.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
