use std::sync::Arc;
use axum::{
    Router,
    routing::get,
    extract::{Json, State},
    http::{header, HeaderValue},
    response::IntoResponse,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use crate::context::AppContext;
use crate::observability::metrics;
use crate::streaming::RegistryStats;
use crate::streaming::session::websocket_handler;
use crate::utils::helper::iso_timestamp_now;

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let cors = cors_layer(&ctx.config.server.cors_origins);

    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/metrics", get(render_metrics))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(ctx)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
    sources: Vec<String>,
    cache_connected: bool,
}

async fn health_check(State(ctx): State<Arc<AppContext>>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        timestamp: iso_timestamp_now(),
        sources: ctx.fetcher.sources().names(),
        cache_connected: ctx.cache.is_connected(),
    })
}

#[derive(Serialize)]
struct Stats {
    connections: RegistryStats,
    realtime_updates: Vec<String>,
}

async fn stats(State(ctx): State<Arc<AppContext>>) -> Json<Stats> {
    Json(Stats {
        connections: ctx.registry.stats(),
        realtime_updates: ctx.updater.running().await,
    })
}

async fn render_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use crate::cache::CacheManager;
    use crate::config::{AppConfig, CacheBackendKind};
    use crate::market_data::SourceRegistry;
    use crate::market_data::connectors::DemoSource;

    fn context() -> Arc<AppContext> {
        let mut config = AppConfig::default();
        config.cache.backend = CacheBackendKind::Memory;
        let cache = CacheManager::from_config(&config.cache).unwrap();
        let sources = SourceRegistry::new().with(Arc::new(DemoSource::new()));
        Arc::new(AppContext::assemble(config, cache, sources))
    }

    async fn get_json(router: Router, uri: &str) -> Value {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_lists_sources() {
        let health = get_json(create_router(context()), "/health").await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["sources"][0], "demo");
    }

    #[tokio::test]
    async fn test_stats_reflect_registry() {
        let ctx = context();
        let (id, _rx) = ctx.registry.register();
        ctx.registry.subscribe(id, "BTC-USDT", "1h");

        let stats = get_json(create_router(ctx), "/stats").await;
        assert_eq!(stats["connections"]["total_connections"], 1);
        assert_eq!(stats["connections"]["subscriptions_by_symbol"]["BTC-USDT:1h"], 1);
    }
}
