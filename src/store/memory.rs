//! In-memory order store.
//!
//! Groups records in process. Used for tests, demos and small fixtures;
//! it cannot execute ad-hoc SQL.

use super::{AggregateRow, Dimension, OrderFilter, OrderStore};
use crate::error::StoreError;
use crate::models::{OrderRecord, TenantId};
use crate::sanitizer::SanitizedQuery;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Order store backed by a vector of records.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    records: Vec<OrderRecord>,
}

impl MemoryOrderStore {
    pub fn new(records: Vec<OrderRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Accumulator {
    orders: i64,
    revenue: f64,
    min: Option<f64>,
    max: Option<f64>,
    sum_squares: f64,
}

impl Accumulator {
    fn add(&mut self, amount: f64) {
        self.orders += 1;
        self.revenue += amount;
        self.sum_squares += amount * amount;
        self.min = Some(self.min.map_or(amount, |m| m.min(amount)));
        self.max = Some(self.max.map_or(amount, |m| m.max(amount)));
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn aggregate(
        &self,
        tenant: &TenantId,
        filter: &OrderFilter,
        group_by: &[Dimension],
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let mut groups: BTreeMap<Vec<String>, Accumulator> = BTreeMap::new();
        for record in self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant.as_str())
            .filter(|r| filter.matches(r))
        {
            let key: Vec<String> = group_by.iter().map(|d| d.key_for(record)).collect();
            groups.entry(key).or_default().add(record.total_amount);
        }

        debug!(
            "memory aggregate for tenant {} by {:?}: {} groups",
            tenant,
            group_by,
            groups.len()
        );

        Ok(groups
            .into_iter()
            .map(|(keys, acc)| AggregateRow {
                keys,
                orders: acc.orders,
                revenue: acc.revenue,
                min_amount: acc.min.unwrap_or(0.0),
                max_amount: acc.max.unwrap_or(0.0),
                sum_squares: acc.sum_squares,
            })
            .collect())
    }

    async fn run_read_query(
        &self,
        _tenant: &TenantId,
        _query: &SanitizedQuery,
    ) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Unsupported("in-memory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn order(tenant: &str, status: &str, amount: f64) -> OrderRecord {
        OrderRecord {
            tenant_id: tenant.to_string(),
            marketplace: "shopee".to_string(),
            status: status.to_string(),
            total_amount: amount,
            order_date: Utc.with_ymd_and_hms(2026, 1, 10, 15, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_aggregate_is_tenant_scoped() {
        let store = MemoryOrderStore::new(vec![
            order("a", "paid", 10.0),
            order("a", "paid", 30.0),
            order("b", "paid", 1000.0),
        ]);
        let tenant = TenantId::new("a").unwrap();

        let rows = store
            .aggregate(&tenant, &OrderFilter::default(), &[])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].orders, 2);
        assert_eq!(rows[0].revenue, 40.0);
        assert_eq!(rows[0].min_amount, 10.0);
        assert_eq!(rows[0].max_amount, 30.0);
        assert_eq!(rows[0].sum_squares, 1000.0);
    }

    #[tokio::test]
    async fn test_aggregate_groups_sorted_by_key() {
        let store = MemoryOrderStore::new(vec![
            order("a", "pending", 5.0),
            order("a", "cancelled", 7.0),
            order("a", "paid", 10.0),
        ]);
        let tenant = TenantId::new("a").unwrap();

        let rows = store
            .aggregate(&tenant, &OrderFilter::default(), &[Dimension::Status])
            .await
            .unwrap();

        let keys: Vec<&str> = rows.iter().map(|r| r.key(0)).collect();
        assert_eq!(keys, vec!["cancelled", "paid", "pending"]);
    }

    #[tokio::test]
    async fn test_empty_store_yields_no_rows() {
        let store = MemoryOrderStore::default();
        let tenant = TenantId::new("a").unwrap();
        let rows = store
            .aggregate(&tenant, &OrderFilter::default(), &[])
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(store.is_empty());
    }
}
