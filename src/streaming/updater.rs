use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::config::RealtimeConfig;
use crate::market_data::{FetchRequest, RacingFetcher};
use crate::streaming::broadcaster::Broadcaster;
use crate::streaming::messages::{PriceTick, SubscriptionKey};
use crate::types::Timeframe;
use crate::utils::helper::{current_timestamp_ms, iso_from_millis};
use crate::utils::task_supervisor::TaskSupervisor;

/// Keeps one polling loop per subscribed key and broadcasts the latest
/// candle of each.
pub struct RealtimeUpdater {
    fetcher: Arc<RacingFetcher>,
    broadcaster: Broadcaster,
    config: RealtimeConfig,
    loops: Mutex<TaskSupervisor>,
    shutdown: CancellationToken,
}

impl RealtimeUpdater {
    pub fn new(fetcher: Arc<RacingFetcher>, broadcaster: Broadcaster, config: RealtimeConfig) -> Self {
        RealtimeUpdater {
            fetcher,
            broadcaster,
            config,
            loops: Mutex::new(TaskSupervisor::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run the subscription check every `subscription_check_secs` until shutdown.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let updater = self.clone();
        let period = Duration::from_secs(self.config.subscription_check_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = updater.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        updater.reconcile().await;
                    }
                }
            }
            tracing::info!("Subscription check stopped");
        })
    }

    /// Start loops for newly subscribed keys and stop loops whose key lost
    /// its last subscriber. Returns (started, stopped).
    pub async fn reconcile(&self) -> (usize, usize) {
        if self.shutdown.is_cancelled() {
            return (0, 0);
        }

        let active = self.broadcaster.registry().active_keys();
        let wanted: HashSet<String> = active.iter().map(SubscriptionKey::to_string).collect();

        let mut loops = self.loops.lock().await;
        loops.reap_finished();

        let mut stopped = 0;
        for name in loops.names() {
            if !wanted.contains(&name) && loops.stop(&name).await {
                tracing::info!("Stopped real-time updates for {}", name);
                stopped += 1;
            }
        }

        let mut started = 0;
        for key in active {
            let name = key.to_string();
            if loops.contains(&name) {
                continue;
            }

            let fetcher = self.fetcher.clone();
            let broadcaster = self.broadcaster.clone();
            let period = self.config.poll_period(&key.interval);
            let limit = self.config.candles_per_poll;

            if loops.spawn(name.clone(), move |token| {
                poll_loop(fetcher, broadcaster, key, period, limit, token)
            }) {
                tracing::info!("Started real-time updates for {}", name);
                started += 1;
            }
        }

        (started, stopped)
    }

    pub async fn running(&self) -> Vec<String> {
        let mut names = self.loops.lock().await.names();
        names.sort();
        names
    }

    /// Stop the check loop and every polling loop, waiting for all of them.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down real-time updater");
        self.shutdown.cancel();
        self.loops.lock().await.shutdown_all().await;
    }
}

async fn poll_loop(
    fetcher: Arc<RacingFetcher>,
    broadcaster: Broadcaster,
    key: SubscriptionKey,
    period: Duration,
    limit: usize,
    token: CancellationToken,
) {
    let timeframe = match key.interval.parse::<Timeframe>() {
        Ok(timeframe) => timeframe,
        Err(e) => {
            // Parked rather than ended so reconcile does not respawn it.
            tracing::warn!("Not polling {}: {}", key, e);
            token.cancelled().await;
            return;
        }
    };

    loop {
        let poll = latest_tick(&fetcher, &key.symbol, timeframe, limit);
        let tick = tokio::select! {
            _ = token.cancelled() => break,
            tick = poll => tick,
        };

        if let Some(tick) = tick {
            match serde_json::to_value(&tick) {
                Ok(data) => {
                    broadcaster.price_update(&key.symbol, &key.interval, data);
                }
                Err(e) => tracing::error!("Failed to encode update for {}: {}", key, e),
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }

    tracing::info!("Update loop cancelled for {}", key);
}

async fn latest_tick(fetcher: &RacingFetcher, symbol: &str, timeframe: Timeframe, limit: usize) -> Option<PriceTick> {
    let request = FetchRequest::new(symbol, timeframe).with_limit(limit);
    let outcome = match fetcher.fetch_latest(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Error fetching latest data for {}: {}", symbol, e);
            return None;
        }
    };

    let candle = outcome.last()?;
    let is_complete = current_timestamp_ms().saturating_sub(candle.timestamp) >= timeframe.millis();

    Some(PriceTick {
        time: iso_from_millis(candle.timestamp),
        open: candle.open,
        high: candle.high,
        low: candle.low,
        close: candle.close,
        volume: candle.volume,
        is_complete,
        source: outcome.source.clone(),
    })
}
