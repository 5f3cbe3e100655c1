use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use crate::cache::backend::{CacheBackend, MemoryBackend, RedisBackend};
use crate::cache::key::derive_key;
use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::{Error, Result};
use crate::observability::metrics::{CACHE_ERRORS, CACHE_HITS, CACHE_MISSES};

/// Reconnect schedule after a failed connect: exponential, capped.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    retry_at: Option<Instant>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Backoff { initial, max, current: initial, retry_at: None }
    }

    fn may_attempt(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    fn failed(&mut self, now: Instant) {
        self.retry_at = Some(now + self.current);
        self.current = (self.current * 2).min(self.max);
    }

    fn reset(&mut self) {
        self.current = self.initial;
        self.retry_at = None;
    }
}

/// Best-effort typed cache. Every backend failure is logged and absorbed:
/// reads become misses and writes become no-ops.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    connected: AtomicBool,
    backoff: Mutex<Backoff>,
    dialing: tokio::sync::Mutex<()>,
    default_ttl: Duration,
    operation_timeout: Duration,
    key_hash_threshold: usize,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        CacheManager {
            backend,
            connected: AtomicBool::new(false),
            backoff: Mutex::new(Backoff::new(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
            )),
            dialing: tokio::sync::Mutex::new(()),
            default_ttl: config.default_ttl(),
            operation_timeout: config.operation_timeout(),
            key_hash_threshold: config.key_hash_threshold,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Redis => Arc::new(RedisBackend::new(&config.redis_url)?),
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        Ok(Self::new(backend, config))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Derive a key with the configured hash threshold.
    pub fn key<P: Serialize + ?Sized>(&self, prefix: &str, params: &P) -> Result<String> {
        derive_key(prefix, params, self.key_hash_threshold)
    }

    /// Connect if disconnected, unless the last failure is still inside its
    /// backoff window. Only one caller dials at a time; concurrent callers
    /// report disconnected instead of waiting.
    pub async fn connect(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        let Ok(_dialing) = self.dialing.try_lock() else {
            return false;
        };
        if self.is_connected() {
            return true;
        }

        let now = Instant::now();
        if !self.backoff_guard().may_attempt(now) {
            return false;
        }

        match self.bounded(self.backend.ping()).await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                self.backoff_guard().reset();
                tracing::info!("Connected to cache backend");
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                let mut backoff = self.backoff_guard();
                backoff.failed(now);
                tracing::error!(
                    "Failed to connect to cache backend: {} (next attempt in {:?})",
                    e,
                    backoff.retry_at.map(|at| at.saturating_duration_since(now))
                );
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        self.backend.close().await;
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from cache backend");
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.connect().await {
            CACHE_MISSES.inc();
            return None;
        }

        let raw = match self.bounded(self.backend.get(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                self.absorb("get", e);
                CACHE_MISSES.inc();
                return None;
            }
        };

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        });

        if value.is_some() {
            CACHE_HITS.inc();
        } else {
            CACHE_MISSES.inc();
        }
        value
    }

    /// `ttl` of `None` or zero uses the configured default.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if !self.connect().await {
            return;
        }

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::error!("Cache set error for {}: {}", key, e);
                return;
            }
        };

        let ttl = ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(self.default_ttl);
        if let Err(e) = self.bounded(self.backend.set_ex(key, serialized, ttl)).await {
            self.absorb("set", e);
        }
    }

    /// Best-effort pattern delete; skipped while disconnected.
    pub async fn delete(&self, pattern: &str) {
        if !self.is_connected() {
            return;
        }
        match self.bounded(self.backend.delete_pattern(pattern)).await {
            Ok(count) => tracing::debug!("Deleted {} cache entries matching {}", count, pattern),
            Err(e) => self.absorb("delete", e),
        }
    }

    /// Best-effort flush; skipped while disconnected.
    pub async fn clear_all(&self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.bounded(self.backend.flush()).await {
            self.absorb("clear", e);
        }
    }

    /// Return the cached value for `key`, or run `producer`, cache its
    /// success and return it. Producer errors are returned and not cached.
    pub async fn get_or_insert_with<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            tracing::debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await;
        tracing::debug!("Cache miss for {}, stored result", key);
        Ok(value)
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .unwrap_or_else(|_| {
                Err(Error::CacheUnavailable(format!(
                    "operation timed out after {:?}",
                    self.operation_timeout
                )))
            })
    }

    /// Log a backend failure and drop to disconnected so the next operation
    /// goes through the reconnect schedule.
    fn absorb(&self, op: &str, e: Error) {
        CACHE_ERRORS.inc();
        tracing::error!("Cache {} error: {}", op, e);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.backoff_guard().failed(Instant::now());
        }
    }

    fn backoff_guard(&self) -> std::sync::MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(|e| e.into_inner())
    }
}
