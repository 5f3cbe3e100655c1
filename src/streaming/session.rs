use std::sync::Arc;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{sink::SinkExt, stream::StreamExt};
use tracing::Instrument;
use crate::context::AppContext;
use crate::error::Result;
use crate::observability::tracing::trace_session;
use crate::streaming::messages::{ClientMessage, ServerMessage};
use crate::streaming::registry::SubscriptionRegistry;
use crate::types::ConnectionId;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
) -> Response {
    let registry = ctx.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<SubscriptionRegistry>) {
    let (id, mut outbound) = registry.register();
    let span = trace_session(&id.short());
    let (mut sender, mut receiver) = socket.split();

    // Writer: drains this connection's queue. Ends when the registry drops
    // the queue (prune, disconnect, shutdown) or the socket fails.
    let mut send_task = tokio::spawn(
        async move {
            while let Some(frame) = outbound.recv().await {
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        }
        .instrument(span.clone()),
    );

    let reader_registry = registry.clone();
    let mut recv_task = tokio::spawn(
        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => {
                        if handle_text(&reader_registry, id, &text).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        .instrument(span),
    );

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    registry.disconnect(id);
}

/// Apply one client frame. Replies go through the connection's queue so they
/// stay ordered with broadcasts. An error means the connection is gone.
pub fn handle_text(registry: &SubscriptionRegistry, id: ConnectionId, text: &str) -> Result<()> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Rejected client frame: {}", e);
            let reply = ServerMessage::Error { message: format!("invalid message: {}", e) };
            return registry.send(id, &reply);
        }
    };

    let reply = match message {
        ClientMessage::Subscribe { symbol, interval } => {
            registry.subscribe(id, &symbol, &interval);
            ServerMessage::Subscribed { symbol, interval }
        }
        ClientMessage::Unsubscribe { symbol } => {
            registry.unsubscribe(id, &symbol);
            ServerMessage::Unsubscribed { symbol }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    };
    registry.send(id, &reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::messages::SubscriptionKey;
    use serde_json::Value;

    fn next_frame(rx: &mut crate::streaming::registry::Outbound) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_subscribe_then_unsubscribe_acks() {
        let registry = SubscriptionRegistry::new(8);
        let (id, mut rx) = registry.register();

        handle_text(&registry, id, r#"{"type":"subscribe","symbol":"BTC-USDT"}"#).unwrap();
        let ack = next_frame(&mut rx);
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["interval"], "1h");
        assert_eq!(registry.subscriber_count(&SubscriptionKey::new("BTC-USDT", "1h")), 1);

        handle_text(&registry, id, r#"{"type":"unsubscribe","symbol":"BTC-USDT"}"#).unwrap();
        assert_eq!(next_frame(&mut rx)["type"], "unsubscribed");
        assert!(registry.active_keys().is_empty());
    }

    #[test]
    fn test_malformed_frame_gets_error_reply() {
        let registry = SubscriptionRegistry::new(8);
        let (id, mut rx) = registry.register();

        handle_text(&registry, id, "{oops").unwrap();
        let reply = next_frame(&mut rx);
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().starts_with("invalid message"));

        handle_text(&registry, id, r#"{"type":"ping"}"#).unwrap();
        assert_eq!(next_frame(&mut rx)["type"], "pong");
    }
}
