use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

/// TTL for a `Taken` sentinel.
pub const TAKEN_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for an `Available` sentinel; bounds the allocate race window.
pub const AVAILABLE_TTL: Duration = Duration::from_secs(30);
pub const RESOLUTION_TTL: Duration = Duration::from_secs(60 * 60);

/// Entry count above which `MemoryCache::set` sweeps out expired entries.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed cache payload: {0}")]
    Payload(#[from] serde_json::Error),
}

// ── Backend contract ───────────────────────────────────────────────────────

/// A plain string key/value store with per-key expiry.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

/// Thread-safe in-process cache.
///
/// Backed by a DashMap so reads are concurrent and lock-free for most cases.
/// Expired entries are dropped when read, and swept in bulk once the map
/// grows past a threshold.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.inner.get(key) {
            Some(entry) if entry.1 > now => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.remove_if(key, |_, (_, deadline)| *deadline <= now);
        }
        None
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        if self.inner.len() >= PRUNE_THRESHOLD {
            self.inner.retain(|_, (_, deadline)| *deadline > now);
        }
        self.inner
            .insert(key.to_owned(), (value.to_owned(), now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live_value(key).is_some())
    }
}

/// Redis-backed cache shared between processes. The connection manager
/// reconnects on its own after a dropped connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::debug!("Redis cache connection established");
        Ok(Self {
            conn,
            key_prefix: "shortly:".into(),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.make_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.make_key(key), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.make_key(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(self.make_key(key)).await?;
        Ok(found)
    }
}

// ── Typed view ─────────────────────────────────────────────────────────────

/// Cached hint about whether a short code is in use. Never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSentinel {
    Taken,
    Available,
}

impl CacheSentinel {
    fn as_str(self) -> &'static str {
        match self {
            CacheSentinel::Taken => "taken",
            CacheSentinel::Available => "available",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "taken" => Some(CacheSentinel::Taken),
            "available" => Some(CacheSentinel::Available),
            _ => None,
        }
    }

    fn ttl(self) -> Duration {
        match self {
            CacheSentinel::Taken => TAKEN_TTL,
            CacheSentinel::Available => AVAILABLE_TTL,
        }
    }
}

/// Snapshot of a resolvable link. `expires_at` must be re-checked on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResolution {
    pub link_id: i64,
    pub target: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedResolution {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn sentinel_key(code: &str) -> String {
    format!("shortcode:exists:{code}")
}

fn resolution_key(code: &str) -> String {
    format!("url:{code}")
}

/// Sentinels and cached resolutions over an optional [`KvCache`].
///
/// Every failure is logged and turned into a miss or a no-op, so a missing
/// backend and a broken backend look identical to callers.
#[derive(Clone, Default)]
pub struct ResolutionCache {
    backend: Option<Arc<dyn KvCache>>,
}

impl ResolutionCache {
    pub fn new(backend: Option<Arc<dyn KvCache>>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn sentinel(&self, code: &str) -> Option<CacheSentinel> {
        let backend = self.backend.as_ref()?;
        match backend.get(&sentinel_key(code)).await {
            Ok(raw) => raw.as_deref().and_then(CacheSentinel::parse),
            Err(e) => {
                degraded("read sentinel", code, &e);
                None
            }
        }
    }

    pub async fn mark(&self, code: &str, sentinel: CacheSentinel) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(e) = backend
            .set(&sentinel_key(code), sentinel.as_str(), sentinel.ttl())
            .await
        {
            degraded("write sentinel", code, &e);
        }
    }

    pub async fn resolution(&self, code: &str) -> Option<CachedResolution> {
        let backend = self.backend.as_ref()?;
        let raw = match backend.get(&resolution_key(code)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                degraded("read resolution", code, &e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(resolution) => Some(resolution),
            Err(e) => {
                degraded("decode resolution", code, &CacheError::from(e));
                self.evict_resolution(code).await;
                None
            }
        }
    }

    pub async fn store_resolution(&self, code: &str, resolution: &CachedResolution) {
        let Some(backend) = &self.backend else {
            return;
        };
        let payload = match serde_json::to_string(resolution) {
            Ok(p) => p,
            Err(e) => {
                degraded("encode resolution", code, &CacheError::from(e));
                return;
            }
        };
        if let Err(e) = backend
            .set(&resolution_key(code), &payload, RESOLUTION_TTL)
            .await
        {
            degraded("write resolution", code, &e);
        }
    }

    pub async fn evict_resolution(&self, code: &str) {
        self.delete(&resolution_key(code), code).await;
    }

    /// Drop both the resolution and the sentinel for `code`.
    pub async fn invalidate(&self, code: &str) {
        self.delete(&resolution_key(code), code).await;
        self.delete(&sentinel_key(code), code).await;
    }

    async fn delete(&self, key: &str, code: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(e) = backend.delete(key).await {
            degraded("evict", code, &e);
        }
    }
}

fn degraded(op: &str, code: &str, err: &CacheError) {
    tracing::warn!("Cache degraded, {} for '{}' skipped: {}", op, code, err);
}
