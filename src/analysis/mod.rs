//! Statistical derivations over monthly paid revenue.
//!
//! Unlike the plain aggregates, these functions look at the whole history
//! of the tenant: the date range of the request is ignored and only paid
//! orders count as revenue.

pub mod forecast;
pub mod health;
pub mod seasonality;

use crate::error::Result;
use crate::filters::{business_today, month_key, month_keys_between, parse_month_key, NormalizedFilter};
use crate::models::PAID_STATUS;
use crate::registry::QueryContext;
use crate::store::Dimension;
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeMap;

/// Paid orders and revenue of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub month: String,
    #[serde(skip)]
    pub year: i32,
    #[serde(skip)]
    pub month_number: u32,
    pub orders: i64,
    pub revenue: f64,
}

/// Filter used for history: paid only, same marketplace, all time.
pub fn paid_history_filter(filter: &NormalizedFilter) -> NormalizedFilter {
    NormalizedFilter {
        status: Some(PAID_STATUS.to_string()),
        marketplace: filter.marketplace.clone(),
        range: None,
    }
}

/// Monthly paid series from the first month with orders up to and
/// including the current business month. Gaps are zero-filled.
pub async fn paid_monthly_series(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
) -> Result<Vec<MonthlyPoint>> {
    let rows = ctx
        .aggregate(&paid_history_filter(filter), &[Dimension::Month])
        .await?;

    let mut by_month: BTreeMap<String, (i64, f64)> = BTreeMap::new();
    for row in &rows {
        let entry = by_month.entry(row.key(0).to_string()).or_default();
        entry.0 += row.orders;
        entry.1 += row.revenue;
    }

    let today = business_today(ctx.clock());
    let current = month_key(today.year(), today.month());
    let Some(first) = by_month.keys().next().cloned() else {
        return Ok(Vec::new());
    };

    Ok(month_keys_between(&first, &current)
        .into_iter()
        .filter_map(|month| {
            let (year, month_number) = parse_month_key(&month)?;
            let (orders, revenue) = by_month.get(&month).copied().unwrap_or_default();
            Some(MonthlyPoint {
                month,
                year,
                month_number,
                orders,
                revenue,
            })
        })
        .collect())
}
