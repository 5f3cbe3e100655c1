use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;
use tokio::time::Instant;
use crate::error::{Error, Result};

/// Raw string store behind [`super::CacheManager`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Establish the connection if needed and check it answers.
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Delete keys matching a glob pattern, returning how many went.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize>;

    async fn flush(&self) -> Result<()>;

    async fn close(&self);
}

fn unavailable(e: redis::RedisError) -> Error {
    Error::CacheUnavailable(e.to_string())
}

pub struct RedisBackend {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisBackend {
    /// Parses the URL only; the connection is opened on the first `ping`.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        Ok(RedisBackend {
            client,
            connection: RwLock::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::CacheUnavailable("not connected".into()))
    }

    /// Forget a connection that just failed so the next `ping` redials.
    async fn reset_on_error<T>(&self, result: redis::RedisResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
                    *self.connection.write().await = None;
                }
                Err(unavailable(e))
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn ping(&self) -> Result<()> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(_) => {
                let conn = self
                    .client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(unavailable)?;
                *self.connection.write().await = Some(conn.clone());
                conn
            }
        };

        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.reset_on_error(result).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("GET").arg(key).query_async(&mut conn).await;
        self.reset_on_error(result).await
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let millis = ttl.as_millis().max(1) as u64;
        let result = redis::cmd("PSETEX")
            .arg(key)
            .arg(millis)
            .arg(value)
            .query_async(&mut conn)
            .await;
        self.reset_on_error(result).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = {
            let result = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await;
            self.reset_on_error(result).await?
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let result = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await;
        self.reset_on_error(result).await
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("FLUSHDB").query_async(&mut conn).await;
        self.reset_on_error(result).await
    }

    async fn close(&self) {
        *self.connection.write().await = None;
    }
}

/// Process-local backend. Expiry uses tokio's clock so paused-time tests can
/// advance past a TTL.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());

        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn flush(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn close(&self) {}
}

/// Redis `KEYS` glob subset: `*` and `?`.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
