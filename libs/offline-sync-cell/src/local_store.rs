use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::SyncError;

pub const SYNC_QUEUE_KEY: &str = "case_booking_sync_queue";
pub const DEAD_LETTER_KEY: &str = "case_booking_dead_letters";
pub const CONNECTION_METRICS_KEY: &str = "case_booking_connection_metrics";
pub const NOTIFICATION_OUTBOX_KEY: &str = "case_booking_notification_outbox";
pub const NOTIFICATION_FAILED_KEY: &str = "case_booking_notification_failed";
/// Entries under this prefix are disposable and may be evicted to free space.
pub const CACHE_PREFIX: &str = "cache:";
const CORRUPT_SUFFIX: &str = ".corrupt.";

fn corrupt_key_for(key: &str) -> String {
    format!("{}{}{}", key, CORRUPT_SUFFIX, Utc::now().timestamp_millis())
}

/// Raw key/value backend for the local persistence layer.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

    /// Fails with [`SyncError::QuotaExceeded`] when the backend is full.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), SyncError>;

    async fn remove(&self, key: &str) -> Result<(), SyncError>;

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, SyncError>;
}

struct MemoryEntry {
    value: String,
    expires: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self) -> bool {
        self.expires.map_or(true, |at| at > Instant::now())
    }
}

/// In-process store with an optional byte quota (keys plus values).
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    quota_bytes: Option<usize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes held by live entries.
    pub async fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(k, e)| k.len() + e.value.len())
            .sum()
    }
}

fn purge_expired(entries: &mut HashMap<String, MemoryEntry>) {
    entries.retain(|_, e| e.is_live());
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(e) if e.is_live() => return Ok(Some(e.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live()) {
            entries.remove(key);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), SyncError> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries);

        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, e)| k.len() + e.value.len())
                .sum();
            if others + key.len() + value.len() > quota {
                return Err(SyncError::QuotaExceeded(key.to_string()));
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Redis-backed store. Every key is namespaced so several deployments can
/// share one instance.
pub struct RedisStore {
    pool: Pool,
    namespace: String,
}

impl RedisStore {
    pub async fn new(redis_url: &str, namespace: &str) -> Result<Self, SyncError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            SyncError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to create Redis pool",
                format!("Pool creation error: {}", e),
            )))
        })?;

        let store = Self {
            pool,
            namespace: namespace.to_string(),
        };

        let mut conn = store.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis local store initialized (namespace {})", store.namespace);

        Ok(store)
    }

    async fn get_connection(&self) -> Result<deadpool_redis::Connection, SyncError> {
        self.pool.get().await.map_err(|e| {
            SyncError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get Redis connection",
                format!("Connection error: {}", e),
            )))
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl LocalStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), SyncError> {
        let mut conn = self.get_connection().await?;
        let full_key = self.namespaced(key);

        let result: redis::RedisResult<()> = conn.set(&full_key, value).await;
        match result {
            Ok(()) => {}
            Err(e) if e.code() == Some("OOM") => return Err(SyncError::QuotaExceeded(key.to_string())),
            Err(e) => return Err(e.into()),
        }

        if let Some(ttl) = ttl {
            let _: () = conn.expire(&full_key, ttl.as_secs().max(1) as _).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.del(self.namespaced(key)).await?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut conn = self.get_connection().await?;
        let pattern = format!("{}*", self.namespaced(prefix));
        let keys: Vec<String> = conn.keys(pattern).await?;

        let strip = format!("{}:", self.namespace);
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&strip).map(str::to_string))
            .collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    data: Value,
    stored_at: DateTime<Utc>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl Envelope {
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| at <= Utc::now())
    }
}

/// Typed JSON persistence on top of a [`LocalStore`], with TTL envelopes and
/// quota recovery.
pub struct LocalPersistence {
    store: Arc<dyn LocalStore>,
}

impl LocalPersistence {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SyncError> {
        let raw = match self.store.get(key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => return self.set_aside(key, raw, &e.to_string()).await,
        };

        if envelope.is_expired() {
            debug!("Local entry {} expired", key);
            self.store.remove(key).await?;
            return Ok(None);
        }

        match serde_json::from_value(envelope.data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => self.set_aside(key, raw, &e.to_string()).await,
        }
    }

    /// Unreadable cache entries are dropped. Anything else is kept under a
    /// `<key>.corrupt.<millis>` key so the queue keeps working without
    /// losing the data.
    async fn set_aside<T>(&self, key: &str, raw: String, reason: &str) -> Result<Option<T>, SyncError> {
        if key.starts_with(CACHE_PREFIX) {
            warn!("Discarding unreadable cache entry {}: {}", key, reason);
            self.store.remove(key).await?;
            return Ok(None);
        }

        let corrupt_key = corrupt_key_for(key);
        error!(key, corrupt_key = %corrupt_key, "Unreadable local entry moved aside: {}", reason);
        self.store.set(&corrupt_key, raw, None).await?;
        self.store.remove(key).await?;
        Ok(None)
    }

    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, SyncError> {
        Ok(self.load(key).await?.unwrap_or_default())
    }

    pub async fn save<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), SyncError> {
        let now = Utc::now();
        let envelope = Envelope {
            data: serde_json::to_value(value)?,
            stored_at: now,
            expires_at: ttl.map(|ttl| now + chrono::Duration::milliseconds(ttl.as_millis() as i64)),
        };
        let raw = serde_json::to_string(&envelope)?;

        match self.store.set(key, raw.clone(), ttl).await {
            Err(SyncError::QuotaExceeded(_)) => {
                warn!("Local storage quota exceeded writing {}, cleaning up", key);
                self.free_space(key, raw, ttl).await
            }
            other => other,
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.store.remove(key).await
    }

    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        self.store.keys(prefix).await
    }

    /// Keys of entries that were moved aside because they could not be read.
    pub async fn corrupt_keys(&self, key: &str) -> Result<Vec<String>, SyncError> {
        self.store.keys(&format!("{}{}", key, CORRUPT_SUFFIX)).await
    }

    /// Removes every expired entry and returns how many were dropped.
    pub async fn cleanup_expired(&self) -> Result<usize, SyncError> {
        let mut removed = 0;
        for key in self.store.keys("").await? {
            if let Some(raw) = self.store.get(&key).await? {
                let expired = serde_json::from_str::<Envelope>(&raw)
                    .map(|e| e.is_expired())
                    .unwrap_or(false);
                if expired {
                    self.store.remove(&key).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("Removed {} expired local entries", removed);
        }
        Ok(removed)
    }

    async fn free_space(&self, key: &str, raw: String, ttl: Option<Duration>) -> Result<(), SyncError> {
        self.cleanup_expired().await?;
        match self.store.set(key, raw.clone(), ttl).await {
            Err(SyncError::QuotaExceeded(_)) => {}
            other => return other,
        }

        // Oldest cache entries go first
        let mut cached = Vec::new();
        for cache_key in self.store.keys(CACHE_PREFIX).await? {
            if cache_key == key {
                continue;
            }
            if let Some(stored) = self.store.get(&cache_key).await? {
                let stored_at = serde_json::from_str::<Envelope>(&stored)
                    .map(|e| e.stored_at)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                cached.push((stored_at, cache_key));
            }
        }
        cached.sort();

        for (_, cache_key) in cached {
            debug!("Evicting cache entry {}", cache_key);
            self.store.remove(&cache_key).await?;
            match self.store.set(key, raw.clone(), ttl).await {
                Err(SyncError::QuotaExceeded(_)) => continue,
                other => return other,
            }
        }

        Err(SyncError::QuotaExceeded(key.to_string()))
    }
}
