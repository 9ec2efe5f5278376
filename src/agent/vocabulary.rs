//! Per-tenant status and marketplace vocabulary for the system instruction.
//!
//! Loaded from the store and cached for a long TTL. When a refresh fails
//! the last known vocabulary is served instead, even if expired.

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::models::TenantId;
use crate::store::{Dimension, OrderFilter, OrderStore};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default lifetime of a tenant's vocabulary.
pub const VOCABULARY_TTL_SECONDS: i64 = 600;

/// Distinct values the model may use as filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    pub statuses: Vec<String>,
    pub marketplaces: Vec<String>,
}

impl Vocabulary {
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() && self.marketplaces.is_empty()
    }
}

pub struct VocabularyCache {
    store: Arc<dyn OrderStore>,
    cache: TtlCache<Vocabulary>,
}

impl VocabularyCache {
    pub fn new(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            cache: TtlCache::retaining_stale(ttl, clock),
        }
    }

    /// Vocabulary of `tenant`: fresh, else reloaded, else stale, else empty.
    pub async fn get(&self, tenant: &TenantId) -> Vocabulary {
        if let Some(hit) = self.cache.get(tenant.as_str()) {
            return hit;
        }

        match self.load(tenant).await {
            Ok(vocabulary) => {
                debug!(
                    "Loaded vocabulary for tenant {}: {} statuses, {} marketplaces",
                    tenant,
                    vocabulary.statuses.len(),
                    vocabulary.marketplaces.len()
                );
                self.cache.insert(tenant.as_str(), vocabulary.clone());
                vocabulary
            }
            Err(e) => {
                let stale = self.cache.get_stale(tenant.as_str());
                warn!(
                    "Vocabulary refresh failed for tenant {} ({}), serving {}",
                    tenant,
                    e,
                    if stale.is_some() { "stale copy" } else { "empty list" }
                );
                stale.unwrap_or_default()
            }
        }
    }

    async fn load(&self, tenant: &TenantId) -> Result<Vocabulary, crate::error::StoreError> {
        let all = OrderFilter::default();
        let (statuses, marketplaces) = futures::try_join!(
            self.store.aggregate(tenant, &all, &[Dimension::Status]),
            self.store.aggregate(tenant, &all, &[Dimension::Marketplace]),
        )?;

        let distinct = |rows: Vec<crate::store::AggregateRow>| -> Vec<String> {
            let mut values: Vec<String> = rows
                .iter()
                .map(|r| r.key(0).trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            values.sort();
            values.dedup();
            values
        };

        Ok(Vocabulary {
            statuses: distinct(statuses),
            marketplaces: distinct(marketplaces),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::registry::test_support::*;
    use crate::store::{AggregateRow, MockOrderStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn row(key: &str) -> AggregateRow {
        AggregateRow {
            keys: vec![key.to_string()],
            orders: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cached_within_ttl() {
        let mut store = MockOrderStore::new();
        store
            .expect_aggregate()
            .times(2)
            .returning(|_, _, dims| match dims[0] {
                Dimension::Status => Ok(vec![row("paid"), row("cancelled")]),
                _ => Ok(vec![row("Shopee"), row("Amazon")]),
            });

        let clock = fixed_clock();
        let cache = VocabularyCache::new(
            Arc::new(store),
            clock.clone(),
            Duration::seconds(VOCABULARY_TTL_SECONDS),
        );
        let tenant = TenantId::new(TENANT).unwrap();

        let first = cache.get(&tenant).await;
        clock.advance(Duration::seconds(300));
        let second = cache.get(&tenant).await;

        assert_eq!(first, second);
        assert_eq!(first.statuses, vec!["cancelled", "paid"]);
        assert_eq!(first.marketplaces, vec!["Amazon", "Shopee"]);
    }

    #[tokio::test]
    async fn test_stale_served_when_refresh_fails() {
        let failing = Arc::new(AtomicBool::new(false));
        let flag = failing.clone();
        let mut store = MockOrderStore::new();
        store.expect_aggregate().returning(move |_, _, _| {
            if flag.load(Ordering::SeqCst) {
                Err(StoreError::Database("down".to_string()))
            } else {
                Ok(vec![row("paid")])
            }
        });

        let clock = fixed_clock();
        let cache = VocabularyCache::new(Arc::new(store), clock.clone(), Duration::seconds(60));
        let tenant = TenantId::new(TENANT).unwrap();

        let fresh = cache.get(&tenant).await;
        failing.store(true, Ordering::SeqCst);
        clock.advance(Duration::seconds(120));

        assert_eq!(cache.get(&tenant).await, fresh);
    }

    #[tokio::test]
    async fn test_stale_survives_other_tenant_refresh() {
        let failing = Arc::new(AtomicBool::new(false));
        let flag = failing.clone();
        let mut store = MockOrderStore::new();
        store.expect_aggregate().returning(move |tenant, _, _| {
            if flag.load(Ordering::SeqCst) {
                Err(StoreError::Database("down".to_string()))
            } else {
                Ok(vec![row(tenant.as_str())])
            }
        });

        let clock = fixed_clock();
        let cache = VocabularyCache::new(Arc::new(store), clock.clone(), Duration::seconds(60));
        let first = TenantId::new("tenant-a").unwrap();
        let second = TenantId::new("tenant-b").unwrap();

        let cached = cache.get(&first).await;
        clock.advance(Duration::seconds(120));
        // inserting another tenant must not evict the expired copy
        assert_eq!(cache.get(&second).await.statuses, vec!["tenant-b"]);

        failing.store(true, Ordering::SeqCst);
        assert_eq!(cache.get(&first).await, cached);
        assert_eq!(cached.statuses, vec!["tenant-a"]);
    }

    #[tokio::test]
    async fn test_empty_when_nothing_cached() {
        let mut store = MockOrderStore::new();
        store
            .expect_aggregate()
            .returning(|_, _, _| Err(StoreError::Database("down".to_string())));

        let cache = VocabularyCache::new(Arc::new(store), fixed_clock(), Duration::seconds(60));
        let tenant = TenantId::new(TENANT).unwrap();
        assert!(cache.get(&tenant).await.is_empty());
    }
}
