//! Data access for the order fact table.
//!
//! [`OrderStore`] is the single choke point through which every aggregate
//! and every ad-hoc read reaches the data. Each method takes the tenant
//! explicitly, so a registry function cannot forget to scope its query.

pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

use crate::error::StoreError;
use crate::filters::to_business_local;
use crate::models::{OrderRecord, TenantId};
use crate::sanitizer::SanitizedQuery;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde_json::Value;

/// Grouping key of an aggregate query. Calendar dimensions are evaluated
/// in the business timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Status,
    Marketplace,
    /// `YYYY-MM-DD`
    Day,
    /// Monday of the ISO week, `YYYY-MM-DD`
    Week,
    /// `YYYY-MM`
    Month,
    /// `YYYY`
    Year,
    /// `00`..`23`
    Hour,
    /// `0` (Sunday) .. `6` (Saturday)
    Weekday,
}

impl Dimension {
    /// Group key of a single record for this dimension.
    pub fn key_for(&self, record: &OrderRecord) -> String {
        let local = to_business_local(record.order_date);
        match self {
            Dimension::Status => record.status.clone(),
            Dimension::Marketplace => record.marketplace.clone(),
            Dimension::Day => local.format("%Y-%m-%d").to_string(),
            Dimension::Week => {
                let date = local.date();
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday.format("%Y-%m-%d").to_string()
            }
            Dimension::Month => local.format("%Y-%m").to_string(),
            Dimension::Year => local.format("%Y").to_string(),
            Dimension::Hour => format!("{:02}", local.hour()),
            Dimension::Weekday => local.weekday().num_days_from_sunday().to_string(),
        }
    }
}

/// Row-level filter applied before grouping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    /// Exact status, case-insensitive.
    pub status: Option<String>,
    /// Case-insensitive substring of the marketplace.
    pub marketplace: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
}

impl OrderFilter {
    /// Whether a record passes this filter. Tenant scoping is separate.
    pub fn matches(&self, record: &OrderRecord) -> bool {
        if let Some(ref status) = self.status {
            if !record.status.trim().eq_ignore_ascii_case(status.trim()) {
                return false;
            }
        }
        if let Some(ref marketplace) = self.marketplace {
            if !record
                .marketplace
                .to_lowercase()
                .contains(&marketplace.to_lowercase())
            {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.order_date < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.order_date >= until {
                return false;
            }
        }
        true
    }
}

/// One group of an aggregate query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateRow {
    /// Group key values, in the order of the requested dimensions.
    pub keys: Vec<String>,
    pub orders: i64,
    /// Sum of `total_amount`.
    pub revenue: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    /// Sum of squared `total_amount`, for dispersion.
    pub sum_squares: f64,
}

impl AggregateRow {
    /// Key value at `index`, or an empty string.
    pub fn key(&self, index: usize) -> &str {
        self.keys.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Tenant-scoped, read-only access to the order fact table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// `COUNT`/`SUM`/`MIN`/`MAX` of `total_amount` grouped by `group_by`,
    /// restricted to `tenant` and `filter`. Rows come back sorted by key.
    /// An empty `group_by` yields at most one row with empty keys.
    async fn aggregate(
        &self,
        tenant: &TenantId,
        filter: &OrderFilter,
        group_by: &[Dimension],
    ) -> Result<Vec<AggregateRow>, StoreError>;

    /// Execute a sanitized read query against the tenant's rows only.
    async fn run_read_query(
        &self,
        tenant: &TenantId,
        query: &SanitizedQuery,
    ) -> Result<Vec<Value>, StoreError>;
}
