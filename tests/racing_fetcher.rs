use std::sync::Arc;
use std::time::Duration;
use market_relay::config::FetcherConfig;
use market_relay::market_data::connectors::{flat_candles, MockBehavior, MockSource};
use market_relay::market_data::{FetchRequest, RacingFetcher, SourceRegistry};
use market_relay::types::Timeframe;
use market_relay::Error;
use tokio::time::Instant;

fn fetcher_over(sources: &[Arc<MockSource>]) -> RacingFetcher {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source.clone());
    }
    RacingFetcher::new(registry, &FetcherConfig::default())
}

fn request() -> FetchRequest {
    FetchRequest::new("BTC-USDT", Timeframe::OneHour)
}

#[tokio::test(start_paused = true)]
async fn test_slow_success_beats_fast_failure() {
    let a = Arc::new(MockSource::new(
        "a",
        MockBehavior::succeed_after(Duration::from_secs(2), flat_candles(0, 4, 42.0)),
    ));
    let b = Arc::new(MockSource::new("b", MockBehavior::fail_after(Duration::from_millis(200))));

    let outcome = fetcher_over(&[a.clone(), b.clone()]).fetch(&request()).await.unwrap();

    assert_eq!(outcome.source, "a");
    assert_eq!(outcome.candles.len(), 4);
    assert_eq!(outcome.last().unwrap().close, 42.0);
    assert_eq!(b.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_losers_are_cancelled_before_fetch_returns() {
    let failing = Arc::new(MockSource::new("failing", MockBehavior::fail_after(Duration::from_secs(2))));
    let winner = Arc::new(MockSource::new(
        "winner",
        MockBehavior::succeed_after(Duration::from_millis(500), flat_candles(0, 2, 7.0)),
    ));
    let hanging = Arc::new(MockSource::new("hanging", MockBehavior::Hang));

    let started = Instant::now();
    let outcome = fetcher_over(&[failing.clone(), winner.clone(), hanging.clone()])
        .fetch(&request())
        .await
        .unwrap();

    assert_eq!(outcome.source, "winner");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_secs(2));

    // Both losers were dropped mid-flight and acknowledged before return.
    assert_eq!(failing.cancelled(), 1);
    assert_eq!(hanging.cancelled(), 1);
    assert_eq!(failing.completed(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(failing.calls(), 1);
    assert_eq!(hanging.calls(), 1);
    assert_eq!(winner.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_total_failure_retries_each_source_sequentially() {
    let sources: Vec<Arc<MockSource>> = ["x", "y", "z"]
        .iter()
        .map(|name| Arc::new(MockSource::new(*name, MockBehavior::fail_after(Duration::from_millis(100)))))
        .collect();

    let err = fetcher_over(&sources).fetch(&request()).await.unwrap_err();

    match err {
        Error::AllSourcesExhausted { symbol, failures } => {
            assert_eq!(symbol, "BTC-USDT");
            assert_eq!(failures.len(), 3);
            assert!(failures[0].starts_with("x:"));
            assert!(failures[2].starts_with("z:"));
        }
        other => panic!("unexpected error: {other}"),
    }
    for source in &sources {
        assert_eq!(source.calls(), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_is_bounded_by_the_source_timeout() {
    let hanging = Arc::new(MockSource::new("hanging", MockBehavior::Hang));

    let started = Instant::now();
    let err = fetcher_over(&[hanging.clone()]).fetch(&request()).await.unwrap_err();

    // One timeout in the race, one in the sequential pass.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert!(err.to_string().contains("timed out after 5000ms"));
    assert_eq!(hanging.calls(), 2);
    assert_eq!(hanging.cancelled(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_answers_never_win() {
    let empty = Arc::new(MockSource::new("empty", MockBehavior::Empty { delay: Duration::ZERO }));

    let err = fetcher_over(&[empty.clone()]).fetch(&request()).await.unwrap_err();
    assert!(matches!(err, Error::AllSourcesExhausted { .. }));
    assert!(err.to_string().contains("returned no rows"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_are_not_coalesced() {
    let source = Arc::new(MockSource::new(
        "only",
        MockBehavior::succeed_after(Duration::from_millis(100), flat_candles(0, 1, 1.0)),
    ));
    let fetcher = fetcher_over(&[source.clone()]);

    let (req_a, req_b) = (request(), request());
    let (first, second) = tokio::join!(fetcher.fetch(&req_a), fetcher.fetch(&req_b));
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_incompatible_sources_are_skipped() {
    let eth_only = Arc::new(MockSource::new("eth", MockBehavior::Hang).accepting(&["ETH-USDT"]));
    let btc = Arc::new(MockSource::new(
        "btc",
        MockBehavior::succeed_after(Duration::from_millis(10), flat_candles(0, 1, 1.0)),
    ));

    let outcome = fetcher_over(&[eth_only.clone(), btc]).fetch(&request()).await.unwrap();
    assert_eq!(outcome.source, "btc");
    assert_eq!(eth_only.calls(), 0);
}
