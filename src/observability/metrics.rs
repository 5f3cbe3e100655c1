use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Fetch metrics
    pub static ref FETCH_WINS: IntCounterVec = IntCounterVec::new(
        Opts::new("fetch_wins_total", "Racing fetches won, by source"),
        &["source"]
    ).expect("metric definition");

    pub static ref SOURCE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("source_failures_total", "Failed source attempts, by source and kind"),
        &["source", "kind"]
    ).expect("metric definition");

    pub static ref SEQUENTIAL_FALLBACKS: IntCounter = IntCounter::new(
        "sequential_fallbacks_total",
        "Fetches that fell back to the sequential pass"
    ).expect("metric definition");

    pub static ref FETCH_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fetch_latency_seconds",
            "End-to-end racing fetch latency"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ).expect("metric definition");

    // Cache metrics
    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "cache_hits_total",
        "Cache lookups that returned a value"
    ).expect("metric definition");

    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "cache_misses_total",
        "Cache lookups that returned nothing"
    ).expect("metric definition");

    pub static ref CACHE_ERRORS: IntCounter = IntCounter::new(
        "cache_errors_total",
        "Cache backend errors absorbed"
    ).expect("metric definition");

    // Streaming metrics
    pub static ref ACTIVE_CONNECTIONS: IntGauge = IntGauge::new(
        "active_connections",
        "Live connections in the subscription registry"
    ).expect("metric definition");

    pub static ref MESSAGES_DELIVERED: IntCounter = IntCounter::new(
        "messages_delivered_total",
        "Envelopes queued to live connections"
    ).expect("metric definition");

    pub static ref CONNECTIONS_PRUNED: IntCounter = IntCounter::new(
        "connections_pruned_total",
        "Connections removed after a failed send"
    ).expect("metric definition");
}

pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(FETCH_WINS.clone()))?;
    REGISTRY.register(Box::new(SOURCE_FAILURES.clone()))?;
    REGISTRY.register(Box::new(SEQUENTIAL_FALLBACKS.clone()))?;
    REGISTRY.register(Box::new(FETCH_LATENCY.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS.clone()))?;
    REGISTRY.register(Box::new(CACHE_MISSES.clone()))?;
    REGISTRY.register(Box::new(CACHE_ERRORS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_CONNECTIONS.clone()))?;
    REGISTRY.register(Box::new(MESSAGES_DELIVERED.clone()))?;
    REGISTRY.register(Box::new(CONNECTIONS_PRUNED.clone()))?;
    Ok(())
}

/// Prometheus text exposition of everything in `REGISTRY`.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
