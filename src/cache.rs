//! Short-TTL memoization.
//!
//! Entries are fresh for `ttl` after they were computed. Expired entries
//! are not served by [`TtlCache::get`] and are swept on the next insert,
//! unless the cache was built with [`TtlCache::retaining_stale`].
//! Only successful computations are inserted; there is no negative caching.
//! Read-then-write without a lock across the computation is acceptable
//! because values are idempotent recomputations.

use crate::clock::Clock;
use crate::models::TenantId;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default lifetime of aggregate results.
pub const RESULT_TTL_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    computed_at: DateTime<Utc>,
}

/// Keyed cache with a fixed time-to-live.
pub struct TtlCache<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    sweep: bool,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
            sweep: true,
        }
    }

    /// A cache that never sweeps, so [`TtlCache::get_stale`] keeps working
    /// for every key once inserted. For small keyspaces only.
    pub fn retaining_stale(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sweep: false,
            ..Self::new(ttl, clock)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if now - entry.computed_at < self.ttl => {
                debug!("cache hit: {}", key);
                Some(entry.value.clone())
            }
            _ => {
                debug!("cache miss: {}", key);
                None
            }
        }
    }

    /// Value for `key` regardless of age.
    pub fn get_stale(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.value.clone())
    }

    /// Store a freshly computed value, sweeping expired entries first.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if self.sweep {
            let before = entries.len();
            entries.retain(|_, e| now - e.computed_at < ttl);
            if entries.len() < before {
                debug!("evicted {} expired cache entries", before - entries.len());
            }
        }

        entries.insert(
            key.into(),
            CacheEntry {
                value,
                computed_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stable key for `(tenant, function, params)`.
///
/// Struct fields serialize in declaration order, so equal params always
/// produce equal keys.
pub fn cache_key<P: Serialize>(tenant: &TenantId, function: &str, params: &P) -> String {
    let params = serde_json::to_string(params).unwrap_or_default();
    format!("{}|{}|{}", tenant.as_str(), function, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::QueryParams;
    use chrono::TimeZone;

    fn setup() -> (Arc<FixedClock>, TtlCache<u32>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
        ));
        let cache = TtlCache::new(Duration::seconds(RESULT_TTL_SECONDS), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_hit_within_ttl() {
        let (clock, cache) = setup();
        cache.insert("k", 7);
        clock.advance(Duration::seconds(59));
        assert_eq!(cache.get("k"), Some(7));
    }

    #[test]
    fn test_miss_after_ttl_but_stale_available() {
        let (clock, cache) = setup();
        cache.insert("k", 7);
        clock.advance(Duration::seconds(60));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.get_stale("k"), Some(7));
    }

    #[test]
    fn test_expired_entries_swept_on_insert() {
        let (clock, cache) = setup();
        cache.insert("old", 1);
        clock.advance(Duration::seconds(61));
        cache.insert("new", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_stale("old"), None);
    }

    #[test]
    fn test_retaining_cache_keeps_expired_entries() {
        let (clock, _) = setup();
        let cache = TtlCache::retaining_stale(Duration::seconds(60), clock.clone());
        cache.insert("a", 1);
        clock.advance(Duration::seconds(120));
        cache.insert("b", 2);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get_stale("a"), Some(1));
    }

    #[test]
    fn test_cache_key_is_stable_and_tenant_specific() {
        let params = QueryParams {
            status: Some("paid".to_string()),
            period_days: Some(30),
            ..Default::default()
        };
        let a = TenantId::new("a").unwrap();
        let b = TenantId::new("b").unwrap();

        assert_eq!(
            cache_key(&a, "total_sales", &params),
            cache_key(&a, "total_sales", &params.clone())
        );
        assert_ne!(
            cache_key(&a, "total_sales", &params),
            cache_key(&b, "total_sales", &params)
        );
        assert_ne!(
            cache_key(&a, "total_sales", &params),
            cache_key(&a, "count_orders", &params)
        );
    }
}
