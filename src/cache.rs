// ===============================
// src/cache.rs (balance cache port + policy)
// ===============================
//
// Two layers:
// - CacheBackend: raw string key/value store with ttl. May fail or hang.
// - BalanceCache: the policy every caller goes through. Each backend call is
//   bounded by a timeout; failures, timeouts and undecodable payloads become a
//   miss (reads) or a no-op (writes / invalidation). Nothing escapes as an error.
//
use std::future::Future;
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::{GroupId, SettlementInstruction};
use crate::metrics::{CACHE_ERRORS, CACHE_HITS, CACHE_INVALIDATIONS, CACHE_MISSES};

pub const KEY_PREFIX: &str = "group_balance:";

pub fn cache_key(group: &GroupId) -> String {
    format!("{KEY_PREFIX}{group}")
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("cached payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
    fn del(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.write().await;
        let before = map.len();
        map.retain(|_, e| !e.expired(now));
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let map = self.entries.read().await;
            match map.get(key) {
                None => return Ok(None),
                Some(e) if !e.expired(now) => return Ok(Some(e.value.clone())),
                Some(_) => {}
            }
        }
        // passive expiry
        let mut map = self.entries.write().await;
        if map.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry { value, created_at: Instant::now(), ttl };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Backend that never stores anything; every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl CacheBackend for NullBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Runtime-selected backend (CACHE_MODE).
#[derive(Debug)]
pub enum AnyBackend {
    Memory(MemoryBackend),
    Null(NullBackend),
}

impl AnyBackend {
    pub fn memory(&self) -> Option<&MemoryBackend> {
        match self {
            AnyBackend::Memory(m) => Some(m),
            AnyBackend::Null(_) => None,
        }
    }
}

impl CacheBackend for AnyBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            AnyBackend::Memory(b) => b.get(key).await,
            AnyBackend::Null(b) => b.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        match self {
            AnyBackend::Memory(b) => b.set(key, value, ttl).await,
            AnyBackend::Null(b) => b.set(key, value, ttl).await,
        }
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        match self {
            AnyBackend::Memory(b) => b.del(key).await,
            AnyBackend::Null(b) => b.del(key).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy wrapper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheCfg {
    pub ttl: Duration,
    pub op_timeout: Duration,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(3600), op_timeout: Duration::from_millis(50) }
    }
}

#[derive(Debug)]
pub struct BalanceCache<B> {
    backend: B,
    cfg: CacheCfg,
}

impl<B: CacheBackend> BalanceCache<B> {
    pub fn new(backend: B, cfg: CacheCfg) -> Self {
        Self { backend, cfg }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn ttl(&self) -> Duration {
        self.cfg.ttl
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match timeout(self.cfg.op_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(CacheError::Timeout(self.cfg.op_timeout)),
        }
    }

    /// Cached plan for the group, or None on miss / expiry / any backend trouble.
    pub async fn get(&self, group: &GroupId) -> Option<Vec<SettlementInstruction>> {
        let key = cache_key(group);
        let raw = match self.bounded(self.backend.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                CACHE_MISSES.inc();
                return None;
            }
            Err(e) => {
                CACHE_ERRORS.with_label_values(&["get"]).inc();
                CACHE_MISSES.inc();
                warn!(%key, error = %e, "cache get degraded to miss");
                return None;
            }
        };

        match serde_json::from_str::<Vec<SettlementInstruction>>(&raw) {
            Ok(plan) => {
                CACHE_HITS.inc();
                Some(plan)
            }
            Err(e) => {
                CACHE_ERRORS.with_label_values(&["decode"]).inc();
                CACHE_MISSES.inc();
                warn!(%key, error = %CacheError::from(e), "cache entry undecodable, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, group: &GroupId, plan: &[SettlementInstruction]) {
        let key = cache_key(group);
        let value = match serde_json::to_string(plan) {
            Ok(v) => v,
            Err(e) => {
                CACHE_ERRORS.with_label_values(&["encode"]).inc();
                warn!(%key, error = %e, "cache encode failed, skip set");
                return;
            }
        };
        if let Err(e) = self.bounded(self.backend.set(&key, value, self.cfg.ttl)).await {
            CACHE_ERRORS.with_label_values(&["set"]).inc();
            warn!(%key, error = %e, "cache set dropped");
        }
    }

    /// Remove the group's entry. Never fails from the caller's point of view;
    /// a lost invalidation leaves a stale entry that expires at ttl.
    pub async fn invalidate(&self, group: &GroupId) {
        let key = cache_key(group);
        match self.bounded(self.backend.del(&key)).await {
            Ok(()) => {
                CACHE_INVALIDATIONS.inc();
                debug!(%key, "cache invalidated");
            }
            Err(e) => {
                CACHE_ERRORS.with_label_values(&["del"]).inc();
                warn!(%key, error = %e, "cache invalidation lost; entry will expire at ttl");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct DownBackend;

    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    struct HangingBackend;

    impl CacheBackend for HangingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    fn plan() -> Vec<SettlementInstruction> {
        vec![SettlementInstruction { from: "B".into(), to: "A".into(), amount: dec!(50) }]
    }

    fn g() -> GroupId {
        GroupId::new("g1")
    }

    #[test]
    fn key_uses_group_balance_prefix() {
        assert_eq!(cache_key(&g()), "group_balance:g1");
    }

    #[tokio::test]
    async fn memory_round_trip_and_invalidate() {
        let cache = BalanceCache::new(MemoryBackend::new(), CacheCfg::default());
        assert!(cache.get(&g()).await.is_none());
        cache.set(&g(), &plan()).await;
        assert_eq!(cache.get(&g()).await, Some(plan()));
        cache.invalidate(&g()).await;
        assert!(cache.get(&g()).await.is_none());
    }

    #[tokio::test]
    async fn stored_value_is_json_with_fixed_precision() {
        let backend = MemoryBackend::new();
        backend
            .set("group_balance:g1", serde_json::to_string(&plan()).unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        let raw = backend.get("group_balance:g1").await.unwrap().unwrap();
        assert_eq!(raw, r#"[{"from":"B","to":"A","amount":"50.00"}]"#);
    }

    #[tokio::test]
    async fn entries_expire_passively() {
        let cfg = CacheCfg { ttl: Duration::from_millis(20), ..CacheCfg::default() };
        let cache = BalanceCache::new(MemoryBackend::new(), cfg);
        cache.set(&g(), &plan()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&g()).await.is_none());
        assert!(cache.backend().is_empty().await);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let backend = MemoryBackend::new();
        backend.set("a", "[]".into(), Duration::from_millis(10)).await.unwrap();
        backend.set("b", "[]".into(), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_silently() {
        let cache = BalanceCache::new(DownBackend, CacheCfg::default());
        cache.set(&g(), &plan()).await;
        assert!(cache.get(&g()).await.is_none());
        cache.invalidate(&g()).await;
    }

    #[tokio::test]
    async fn hanging_backend_is_a_miss_after_timeout() {
        let cfg = CacheCfg { op_timeout: Duration::from_millis(10), ..CacheCfg::default() };
        let cache = BalanceCache::new(HangingBackend, cfg);
        assert!(cache.get(&g()).await.is_none());
        cache.set(&g(), &plan()).await;
        cache.invalidate(&g()).await;
    }

    #[tokio::test]
    async fn garbage_payload_is_a_miss() {
        let backend = MemoryBackend::new();
        backend.set("group_balance:g1", "not json".into(), Duration::from_secs(5)).await.unwrap();
        let cache = BalanceCache::new(backend, CacheCfg::default());
        assert!(cache.get(&g()).await.is_none());
    }

    #[tokio::test]
    async fn null_backend_always_misses() {
        let cache = BalanceCache::new(AnyBackend::Null(NullBackend), CacheCfg::default());
        cache.set(&g(), &plan()).await;
        assert!(cache.get(&g()).await.is_none());
        assert!(cache.backend().memory().is_none());
    }
}
