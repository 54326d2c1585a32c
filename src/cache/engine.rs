//! Cache Engine Module
//!
//! Orchestrates the local tier, the remote tier, the TTL policy and the
//! stampede guard behind one cloneable handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::entry::saturating_millis;
use crate::cache::{
    CacheStatistics, CacheValue, LocalTier, RedisStore, RemoteTier, StampedeGuard,
    StatisticsReport, TtlPolicy,
};
use crate::config::Config;
use crate::error::{CacheError, Result};

// == Tier Scope ==
/// Which tiers an operation may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierScope {
    /// In-process tier only
    Local,
    /// In-process tier, then the shared tier when available
    #[default]
    All,
}

struct EngineInner {
    local: LocalTier,
    remote: RemoteTier,
    policy: TtlPolicy,
    stats: CacheStatistics,
    guard: StampedeGuard,
}

// == Cache Engine ==
/// The multi-tier cache.
///
/// Cloning is cheap and every clone shares the same tiers, counters and
/// in-flight table. Build one at startup and hand clones to consumers.
///
/// A stored `null` reads back as a miss: callers cannot tell a cached `null`
/// from an absent, expired or unreachable entry.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    // == Constructors ==
    pub fn new(local: LocalTier, remote: RemoteTier, policy: TtlPolicy) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                local,
                remote,
                policy,
                stats: CacheStatistics::new(),
                guard: StampedeGuard::new(),
            }),
        }
    }

    /// An engine without a shared tier.
    pub fn local_only(capacity: usize, policy: TtlPolicy) -> Result<Self> {
        Ok(Self::new(
            LocalTier::new(capacity)?,
            RemoteTier::disabled(),
            policy,
        ))
    }

    /// Builds the engine described by `config`, probing Redis when a URL is set.
    ///
    /// Invalid settings fail here; an unreachable Redis does not, the engine
    /// just runs local-only.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let policy = TtlPolicy::with_overrides(
            &config.ttl_overrides,
            Duration::from_secs(config.default_ttl),
        )?;
        let local = LocalTier::new(config.max_entries)?;

        let remote = match &config.redis_url {
            Some(url) => {
                let store = RedisStore::from_url(
                    url,
                    config.redis_pool_size,
                    config.remote_timeout(),
                )?;
                RemoteTier::connect(Arc::new(store), config.remote_timeout()).await
            }
            None => {
                info!("No REDIS_URL configured, running local-only");
                RemoteTier::disabled()
            }
        };

        Ok(Self::new(local, remote, policy))
    }

    // == Get ==
    /// Looks `key` up in the local tier, then in the remote tier if `scope`
    /// allows it. A remote hit is promoted into the local tier for the policy
    /// TTL or the key's remaining remote lifetime, whichever is shorter.
    pub async fn get(&self, key: &str, scope: TierScope) -> Option<CacheValue> {
        self.lookup(key, scope, true).await
    }

    async fn lookup(&self, key: &str, scope: TierScope, count: bool) -> Option<CacheValue> {
        let inner = &self.inner;

        let local = inner.local.get(key).filter(|value| !value.is_null());
        if count {
            inner.stats.record_l1(local.is_some());
        }
        if local.is_some() {
            debug!(key = %key, "cache hit (L1)");
            return local;
        }

        if scope == TierScope::Local || !inner.remote.is_available() {
            debug!(key = %key, "cache miss");
            return None;
        }

        let remote = inner
            .remote
            .get_with_ttl(key)
            .await
            .filter(|(value, _)| !value.is_null());
        if count {
            inner.stats.record_l2(remote.is_some());
        }
        match remote {
            Some((value, remaining)) => {
                let policy_ttl = inner.policy.ttl_for(key);
                let ttl = remaining.map_or(policy_ttl, |left| left.min(policy_ttl));
                inner.local.set(key, value.clone(), ttl);
                debug!(key = %key, ttl_ms = saturating_millis(ttl), "cache hit (L2), promoted to L1");
                Some(value)
            }
            None => {
                debug!(key = %key, "cache miss");
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` locally, and remotely when `scope` is [`TierScope::All`].
    ///
    /// `ttl` defaults to the policy TTL for the key's category. The local write
    /// lands before the remote one, so the value is readable locally as soon
    /// as this returns, whatever happens on the wire.
    pub async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        scope: TierScope,
    ) {
        let inner = &self.inner;
        let ttl = ttl.unwrap_or_else(|| inner.policy.ttl_for(key));

        if scope == TierScope::All && inner.remote.is_available() {
            inner.local.set(key, value.clone(), ttl);
            inner.remote.set(key, &value, ttl).await;
        } else {
            inner.local.set(key, value, ttl);
        }
        inner.stats.record_set();
        debug!(key = %key, ttl_ms = saturating_millis(ttl), ?scope, "cache set");
    }

    // == Delete ==
    /// Removes `key` from both tiers. Missing keys are fine.
    pub async fn delete(&self, key: &str) {
        self.inner.local.delete(key);
        self.inner.remote.delete(key).await;
        self.inner.stats.record_delete();
        debug!(key = %key, "cache delete");
    }

    // == Clear ==
    /// Empties the local tier and the remote tier (all of it, or the keys
    /// matching `pattern`).
    pub async fn clear(&self, pattern: Option<&str>) {
        self.inner.local.clear();
        self.inner.remote.clear(pattern).await;
        info!(pattern = ?pattern, "cache cleared");
    }

    // == Get Or Fetch ==
    /// Returns the cached value for `key`, computing it with `fetch` on a miss.
    ///
    /// Concurrent misses on the same key run `fetch` once; every caller sees
    /// its value or its error. Successful results are stored in both tiers
    /// with `ttl` (or the policy TTL); failures are never cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue>> + Send + 'static,
    {
        if let Some(value) = self.get(key, TierScope::All).await {
            return Ok(value);
        }

        let engine = self.clone();
        let owned_key = key.to_string();
        self.inner
            .guard
            .run(key, move || async move {
                // A previous leader may have filled the cache since our miss
                if let Some(value) = engine.lookup(&owned_key, TierScope::All, false).await {
                    return Ok(value);
                }
                let value = fetch().await?;
                engine
                    .set(&owned_key, value.clone(), ttl, TierScope::All)
                    .await;
                Ok::<_, CacheError>(value)
            })
            .await
    }

    // == Typed Helpers ==
    /// [`CacheEngine::get`] decoded into `T`.
    pub async fn get_typed<T: DeserializeOwned>(
        &self,
        key: &str,
        scope: TierScope,
    ) -> Result<Option<T>> {
        match self.get(key, scope).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// [`CacheEngine::set`] for any serializable value.
    pub async fn set_typed<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        scope: TierScope,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl, scope).await;
        Ok(())
    }

    /// [`CacheEngine::get_or_fetch`] for typed computations.
    pub async fn get_or_fetch_typed<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let value = self
            .get_or_fetch(
                key,
                move || async move { Ok::<_, CacheError>(serde_json::to_value(fetch().await?)?) },
                ttl,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    // == Statistics ==
    pub fn statistics(&self) -> StatisticsReport {
        let inner = &self.inner;
        inner.stats.report(
            inner.local.len(),
            inner.local.capacity(),
            inner.local.evictions(),
            inner.remote.is_available(),
        )
    }

    /// Drops expired local entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.local.purge_expired()
    }

    pub fn remote_available(&self) -> bool {
        self.inner.remote.is_available()
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.inner.policy
    }

    pub fn local(&self) -> &LocalTier {
        &self.inner.local
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const TIMEOUT: Duration = Duration::from_millis(200);

    async fn engine_with(store: &MemoryStore, capacity: usize) -> CacheEngine {
        let remote = RemoteTier::connect(Arc::new(store.clone()), TIMEOUT).await;
        CacheEngine::new(
            LocalTier::new(capacity).unwrap(),
            remote,
            TtlPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_profile_roundtrip_uses_policy_ttl() {
        let engine = CacheEngine::local_only(100, TtlPolicy::default()).unwrap();

        engine
            .set("user_profile:alice", json!({"name": "Alice"}), None, TierScope::All)
            .await;

        assert_eq!(
            engine.get("user_profile:alice", TierScope::All).await,
            Some(json!({"name": "Alice"}))
        );
        assert_eq!(
            engine.policy().ttl_for("user_profile:alice"),
            Duration::from_secs(900)
        );
    }

    #[tokio::test]
    async fn test_stats_count_each_tier() {
        let store = MemoryStore::new();
        let engine = engine_with(&store, 10).await;

        engine.get("absent", TierScope::All).await;
        engine.get("absent", TierScope::Local).await;
        engine.set("k", json!(1), None, TierScope::All).await;
        engine.get("k", TierScope::All).await;

        let report = engine.statistics();
        assert_eq!(report.l1.hits, 1);
        assert_eq!(report.l1.misses, 2);
        assert_eq!(report.l2.hits, 0);
        assert_eq!(report.l2.misses, 1, "local-scope lookups skip L2");
        assert_eq!(report.total.sets, 1);
        assert!(report.l2.available);
        assert_eq!(report.l1.size, 1);
        assert_eq!(report.l1.max_size, 10);
        assert_eq!(report.l1.evictions, 0);
    }

    #[tokio::test]
    async fn test_stats_report_evictions() {
        let engine = CacheEngine::local_only(2, TtlPolicy::default()).unwrap();

        for key in ["a", "b", "c", "d"] {
            engine.set(key, json!(key), None, TierScope::Local).await;
        }

        let report = engine.statistics();
        assert_eq!(report.l1.size, 2);
        assert_eq!(report.l1.evictions, 2);
    }

    #[tokio::test]
    async fn test_remote_hit_is_promoted() {
        let store = MemoryStore::new();
        let writer = engine_with(&store, 10).await;
        let reader = engine_with(&store, 10).await;

        writer.set("authz:bob:read", json!(true), None, TierScope::All).await;

        assert_eq!(reader.get("authz:bob:read", TierScope::Local).await, None);
        assert_eq!(
            reader.get("authz:bob:read", TierScope::All).await,
            Some(json!(true))
        );
        assert_eq!(reader.statistics().l2.hits, 1);

        store.set_offline(true);
        assert_eq!(
            reader.get("authz:bob:read", TierScope::Local).await,
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn test_promotion_keeps_shorter_remote_lifetime() {
        let store = MemoryStore::new();
        let writer = engine_with(&store, 10).await;
        let reader = engine_with(&store, 10).await;

        writer
            .set("embedding:doc", json!([0.5]), Some(Duration::from_millis(150)), TierScope::All)
            .await;
        assert_eq!(
            reader.get("embedding:doc", TierScope::All).await,
            Some(json!([0.5]))
        );

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(reader.get("embedding:doc", TierScope::Local).await, None);
    }

    #[tokio::test]
    async fn test_huge_ttl_survives_both_tiers() {
        let store = MemoryStore::new();
        let writer = engine_with(&store, 10).await;
        let reader = engine_with(&store, 10).await;

        writer
            .set(
                "k",
                json!("v"),
                Some(Duration::from_secs(18_446_744_073_709_552)),
                TierScope::All,
            )
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(writer.get("k", TierScope::Local).await, Some(json!("v")));
        assert_eq!(reader.get("k", TierScope::All).await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_local_scope_set_skips_remote() {
        let store = MemoryStore::new();
        let engine = engine_with(&store, 10).await;

        engine.set("k", json!("v"), None, TierScope::Local).await;

        assert!(store.is_empty());
        assert_eq!(engine.get("k", TierScope::Local).await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_null_reads_as_miss() {
        let engine = CacheEngine::local_only(10, TtlPolicy::default()).unwrap();

        engine.set("k", CacheValue::Null, None, TierScope::All).await;

        assert_eq!(engine.get("k", TierScope::All).await, None);
    }

    #[tokio::test]
    async fn test_delete_missing_counts() {
        let engine = CacheEngine::local_only(10, TtlPolicy::default()).unwrap();

        engine.delete("missing").await;
        engine.delete("missing").await;

        assert_eq!(engine.statistics().total.deletes, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_both_tiers() {
        let store = MemoryStore::new();
        let engine = engine_with(&store, 10).await;

        engine.set("k", json!(1), None, TierScope::All).await;
        engine.delete("k").await;

        assert!(store.is_empty());
        assert_eq!(engine.get("k", TierScope::All).await, None);
    }

    #[tokio::test]
    async fn test_clear_with_pattern() {
        let store = MemoryStore::new();
        let engine = engine_with(&store, 10).await;

        engine.set("monitoring:cpu", json!(1), None, TierScope::All).await;
        engine.set("authz:x", json!(2), None, TierScope::All).await;

        engine.clear(Some("monitoring:*")).await;

        assert!(engine.local().is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(engine.get("authz:x", TierScope::All).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_result() {
        let engine = CacheEngine::local_only(10, TtlPolicy::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = engine
                .get_or_fetch(
                    "report:2024",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("v1"))
                    },
                    None,
                )
                .await;
            assert_eq!(assert_ok!(value), json!("v1"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_error_not_cached() {
        let engine = CacheEngine::local_only(10, TtlPolicy::default()).unwrap();

        let failed = engine
            .get_or_fetch("k", || async { Err(CacheError::fetch("boom")) }, None)
            .await;
        assert_eq!(assert_err!(failed), CacheError::Fetch("boom".to_string()));
        assert_eq!(engine.get("k", TierScope::All).await, None);

        let recovered = engine
            .get_or_fetch("k", || async { Ok(json!(7)) }, None)
            .await;
        assert_eq!(recovered, Ok(json!(7)));
    }

    #[tokio::test]
    async fn test_get_or_fetch_explicit_ttl() {
        let engine = CacheEngine::local_only(10, TtlPolicy::default()).unwrap();

        engine
            .get_or_fetch("k", || async { Ok(json!(1)) }, Some(Duration::from_millis(30)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(engine.get("k", TierScope::All).await, None);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let engine = CacheEngine::local_only(10, TtlPolicy::default()).unwrap();
        let alice = Profile {
            name: "Alice".to_string(),
            age: 30,
        };

        engine
            .set_typed("user_profile:alice", &alice, None, TierScope::All)
            .await
            .unwrap();
        let loaded: Option<Profile> = engine
            .get_typed("user_profile:alice", TierScope::All)
            .await
            .unwrap();
        assert_eq!(loaded, Some(alice));

        let wrong: Result<Option<u64>> = engine.get_typed("user_profile:alice", TierScope::All).await;
        assert!(matches!(wrong, Err(CacheError::Serialization(_))));

        let fetched: Profile = engine
            .get_or_fetch_typed(
                "user_profile:bob",
                || async {
                    Ok(Profile {
                        name: "Bob".to_string(),
                        age: 41,
                    })
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(fetched.age, 41);
    }

    #[tokio::test]
    async fn test_from_config_local_only() {
        let engine = CacheEngine::from_config(&Config::default()).await.unwrap();
        assert!(!engine.remote_available());
        assert_eq!(engine.statistics().l1.max_size, 1000);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let config = Config {
            max_entries: 0,
            ..Config::default()
        };
        assert!(matches!(
            CacheEngine::from_config(&config).await,
            Err(CacheError::Configuration(_))
        ));
    }
}
