//! Remote Tier Module
//!
//! The shared (L2) tier. [`RemoteStore`] is the wire-level contract
//! (GET / SET with expiry / DEL / KEYS / FLUSH on opaque bytes) and
//! [`RemoteTier`] the fail-open adapter the engine talks to.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use parking_lot::Mutex;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::cache::entry::{current_timestamp_ms, saturating_millis};
use crate::cache::CacheValue;
use crate::error::{CacheError, Result};

/// Longest expiry handed to a store, in milliseconds. Redis rejects expiries
/// that overflow its millisecond clock.
pub const MAX_REMOTE_TTL_MS: u64 = u64::MAX >> 2;

// == Remote Store Trait ==
/// A shared key-value store reachable over the network.
///
/// Implementations report failures as errors; [`RemoteTier`] is the layer that
/// swallows them.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Like `get`, plus the key's remaining lifetime when the store knows it.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, Option<Duration>)>> {
        Ok(self.get(key).await?.map(|bytes| (bytes, None)))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys matching a glob pattern (`*`, `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Drops every key in the store's namespace.
    async fn flush(&self) -> Result<()>;
}

// == Remote Tier ==
/// Fail-open adapter over a [`RemoteStore`].
///
/// Connectivity is probed once in [`RemoteTier::connect`]. A failed probe
/// leaves the tier unavailable for its whole lifetime; every operation then
/// returns a miss or does nothing. Operational failures after a successful
/// probe (transport, timeout, bad payload) are logged and degrade the same way.
#[derive(Clone)]
pub struct RemoteTier {
    store: Option<Arc<dyn RemoteStore>>,
    timeout: Duration,
}

impl RemoteTier {
    /// A tier that never holds anything.
    pub fn disabled() -> Self {
        Self {
            store: None,
            timeout: Duration::ZERO,
        }
    }

    /// Probes `store` and keeps it only if the probe succeeds in time.
    pub async fn connect(store: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        let probe = Self {
            store: Some(Arc::clone(&store)),
            timeout,
        };
        match probe.call("ping", "", store.ping()).await {
            Some(()) => {
                info!("Remote tier connected");
                probe
            }
            None => {
                warn!("Remote tier unreachable at startup, continuing local-only");
                Self {
                    store: None,
                    timeout,
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    // == Call ==
    /// Single call site for every remote operation: applies the timeout and
    /// converts failures into `None`.
    async fn call<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                warn!(op = op, key = %key, error = %err, "Remote tier call failed");
                None
            }
            Err(_) => {
                warn!(
                    op = op,
                    key = %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Remote tier call timed out"
                );
                None
            }
        }
    }

    // == Get ==
    /// Fetches and decodes `key`. Undecodable payloads read as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        self.get_with_ttl(key).await.map(|(value, _)| value)
    }

    /// [`RemoteTier::get`] plus the remaining remote lifetime, when known.
    pub async fn get_with_ttl(&self, key: &str) -> Option<(CacheValue, Option<Duration>)> {
        let store = self.store.as_ref()?;
        let (bytes, ttl) = self.call("get", key, store.get_with_ttl(key)).await??;

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some((value, ttl)),
            Err(err) => {
                warn!(key = %key, error = %err, "Discarding undecodable remote value");
                None
            }
        }
    }

    // == Set ==
    /// Encodes and stores `value` with expiry, capped at
    /// [`MAX_REMOTE_TTL_MS`]. Failures are logged and dropped.
    pub async fn set(&self, key: &str, value: &CacheValue, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let ttl = ttl.min(Duration::from_millis(MAX_REMOTE_TTL_MS));
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %key, error = %err, "Dropping remote write, value not encodable");
                return;
            }
        };
        if self
            .call("set", key, store.set_ex(key, bytes, ttl))
            .await
            .is_some()
        {
            debug!(key = %key, ttl_ms = saturating_millis(ttl), "remote set");
        }
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) {
        if let Some(store) = self.store.as_ref() {
            self.call("delete", key, store.delete(key)).await;
        }
    }

    // == Clear ==
    /// Deletes keys matching `pattern`, or flushes the namespace when `None`.
    ///
    /// Flushing affects every process sharing the store and is meant for
    /// administrative use.
    pub async fn clear(&self, pattern: Option<&str>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match pattern {
            None => {
                if self.call("flush", "*", store.flush()).await.is_some() {
                    info!("Remote tier flushed");
                }
            }
            Some(pattern) => {
                let Some(keys) = self.call("keys", pattern, store.keys(pattern)).await else {
                    return;
                };
                for key in &keys {
                    self.call("delete", key, store.delete(key)).await;
                }
                info!(pattern = %pattern, removed = keys.len(), "Remote tier cleared by pattern");
            }
        }
    }
}

// == Redis Store ==
/// [`RemoteStore`] backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Builds the pool. No connection is opened until first use.
    pub fn from_url(url: &str, pool_size: usize, timeout: Duration) -> Result<Self> {
        let mut config = deadpool_redis::Config::from_url(url);
        let mut pool_config = PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Configuration(format!("invalid Redis settings: {}", e)))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, Option<Duration>)>> {
        let mut conn = self.pool.get().await?;
        let (bytes, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        // PTTL is -1 without expiry and -2 once the key is gone
        let ttl = u64::try_from(pttl)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        Ok(bytes.map(|bytes| (bytes, ttl)))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let millis = saturating_millis(ttl).clamp(1, MAX_REMOTE_TTL_MS);
        conn.pset_ex::<_, _, ()>(key, value, millis).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.keys::<_, Vec<String>>(pattern).await?)
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

// == Memory Store ==
/// In-process [`RemoteStore`], for single-node deployments and tests.
///
/// Clones share the same data, so two engines built over clones of one store
/// behave like two processes sharing a Redis instance. The store can be taken
/// offline to simulate an outage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, (Vec<u8>, u64)>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = current_timestamp_ms();
        self.data
            .lock()
            .values()
            .filter(|(_, expires_at)| now < *expires_at)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores raw bytes, bypassing encoding. Useful to plant corrupt payloads.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        let expires_at = current_timestamp_ms().saturating_add(saturating_millis(ttl));
        self.data.lock().insert(key.to_string(), (bytes, expires_at));
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::Transport("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_ttl(key).await?.map(|(bytes, _)| bytes))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, Option<Duration>)>> {
        self.check_online()?;
        let now = current_timestamp_ms();
        let mut data = self.data.lock();
        let expires_at = match data.get(key) {
            None => return Ok(None),
            Some((_, expires_at)) => *expires_at,
        };
        if now >= expires_at {
            data.remove(key);
            return Ok(None);
        }
        let remaining = Duration::from_millis(expires_at - now);
        Ok(data.get(key).map(|(bytes, _)| (bytes.clone(), Some(remaining))))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.check_online()?;
        self.insert_raw(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online()?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_online()?;
        let now = current_timestamp_ms();
        Ok(self
            .data
            .lock()
            .iter()
            .filter(|(key, (_, expires_at))| now < *expires_at && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        self.check_online()?;
        self.data.lock().clear();
        Ok(())
    }
}

/// Glob matching with `*` (any run) and `?` (any single char).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(200);

    /// Store whose calls never finish within the tier timeout.
    struct StalledStore;

    #[async_trait]
    impl RemoteStore for StalledStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn set_ex(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
        async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    async fn connected(store: &MemoryStore) -> RemoteTier {
        RemoteTier::connect(Arc::new(store.clone()), TIMEOUT).await
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("user_profile:*", "user_profile:alice"));
        assert!(!glob_match("user_profile:*", "authz:alice"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
        assert!(glob_match("*:v1", "x:y:v1"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "a"));
    }

    #[tokio::test]
    async fn test_roundtrip_through_memory_store() {
        let store = MemoryStore::new();
        let tier = connected(&store).await;
        assert!(tier.is_available());

        let value = json!({"name": "Alice", "tags": [1, 2.5, null, true]});
        tier.set("user_profile:alice", &value, Duration::from_secs(60)).await;

        assert_eq!(tier.get("user_profile:alice").await, Some(value));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_disables_permanently() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let tier = connected(&store).await;

        assert!(!tier.is_available());

        // Coming back online does not revive the adapter
        store.set_offline(false);
        tier.set("k", &json!("v"), Duration::from_secs(60)).await;
        assert_eq!(tier.get("k").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_outage_after_connect_fails_open() {
        let store = MemoryStore::new();
        let tier = connected(&store).await;
        tier.set("k", &json!("v"), Duration::from_secs(60)).await;

        store.set_offline(true);

        assert_eq!(tier.get("k").await, None);
        tier.set("k2", &json!("v2"), Duration::from_secs(60)).await;
        tier.delete("k").await;
        tier.clear(Some("*")).await;
        tier.clear(None).await;
        assert!(tier.is_available());
    }

    #[tokio::test]
    async fn test_timeout_is_a_miss() {
        let tier = RemoteTier::connect(Arc::new(StalledStore), TIMEOUT).await;
        assert!(tier.is_available());

        let started = std::time::Instant::now();
        assert_eq!(tier.get("slow").await, None);
        tier.set("slow", &json!(1), Duration::from_secs(1)).await;
        tier.delete("slow").await;

        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let store = MemoryStore::new();
        store.insert_raw("bad", b"\xff not json".to_vec(), Duration::from_secs(60));
        let tier = connected(&store).await;

        assert_eq!(tier.get("bad").await, None);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_capped_not_wrapped() {
        let store = MemoryStore::new();
        let tier = connected(&store).await;

        tier.set("forever", &json!("v"), Duration::from_secs(u64::MAX / 1000 + 1)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (value, ttl) = tier.get_with_ttl("forever").await.unwrap();
        assert_eq!(value, json!("v"));
        let ttl = ttl.unwrap();
        assert!(ttl <= Duration::from_millis(MAX_REMOTE_TTL_MS));
        assert!(ttl > Duration::from_secs(86_400 * 365 * 1000));
    }

    #[tokio::test]
    async fn test_get_with_ttl_reports_remaining() {
        let store = MemoryStore::new();
        let tier = connected(&store).await;

        tier.set("k", &json!(1), Duration::from_secs(10)).await;

        let (_, ttl) = tier.get_with_ttl("k").await.unwrap();
        let ttl = ttl.unwrap();
        assert!(ttl <= Duration::from_secs(10));
        assert!(ttl > Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_remote_expiry() {
        let store = MemoryStore::new();
        let tier = connected(&store).await;

        tier.set("short", &json!(1), Duration::from_millis(30)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(tier.get("short").await, None);
    }

    #[tokio::test]
    async fn test_clear_by_pattern() {
        let store = MemoryStore::new();
        let tier = connected(&store).await;
        let ttl = Duration::from_secs(60);

        tier.set("authz:a", &json!(1), ttl).await;
        tier.set("authz:b", &json!(2), ttl).await;
        tier.set("monitoring:cpu", &json!(3), ttl).await;

        tier.clear(Some("authz:*")).await;

        assert_eq!(tier.get("authz:a").await, None);
        assert_eq!(tier.get("authz:b").await, None);
        assert_eq!(tier.get("monitoring:cpu").await, Some(json!(3)));

        tier.clear(None).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_tier() {
        let tier = RemoteTier::disabled();
        assert!(!tier.is_available());
        assert_eq!(tier.get("k").await, None);
        tier.set("k", &json!(1), Duration::from_secs(1)).await;
        tier.clear(None).await;
    }
}
