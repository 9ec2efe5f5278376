//! Totals and distributions.

use super::{Computed, QueryContext, Totals};
use crate::error::Result;
use crate::filters::NormalizedFilter;
use crate::models::{is_cancelled, is_paid, percentage, ratio, round2};
use crate::store::Dimension;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Orders and amount of one bucket.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Bucket {
    pub orders: i64,
    pub revenue: f64,
}

impl Bucket {
    pub(super) fn add(&mut self, orders: i64, revenue: f64) {
        self.orders += orders;
        self.revenue += revenue;
    }

    pub(super) fn rounded(self) -> Self {
        Bucket {
            orders: self.orders,
            revenue: round2(self.revenue),
        }
    }
}

pub(super) fn buckets_by_key(rows: &[crate::store::AggregateRow], index: usize) -> BTreeMap<String, Bucket> {
    let mut map: BTreeMap<String, Bucket> = BTreeMap::new();
    for row in rows {
        map.entry(row.key(index).to_string())
            .or_default()
            .add(row.orders, row.revenue);
    }
    map.into_iter().map(|(k, b)| (k, b.rounded())).collect()
}

/// Total rows plus optional per-status and per-marketplace rows.
///
/// Breakdowns are only queried for filters that were not applied.
struct Breakdowns {
    totals: Totals,
    by_status: Option<BTreeMap<String, Bucket>>,
    by_marketplace: Option<BTreeMap<String, Bucket>>,
}

async fn breakdowns(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Breakdowns> {
    let (totals, by_status) = if filter.status.is_none() {
        let rows = ctx.aggregate(filter, &[Dimension::Status]).await?;
        (Totals::of(&rows), Some(buckets_by_key(&rows, 0)))
    } else {
        let rows = ctx.aggregate(filter, &[]).await?;
        (Totals::of(&rows), None)
    };

    let by_marketplace = if filter.marketplace.is_none() {
        let rows = ctx.aggregate(filter, &[Dimension::Marketplace]).await?;
        Some(buckets_by_key(&rows, 0))
    } else {
        None
    };

    Ok(Breakdowns {
        totals,
        by_status,
        by_marketplace,
    })
}

pub async fn count_orders(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let b = breakdowns(ctx, filter).await?;
    let counts = |m: BTreeMap<String, Bucket>| -> BTreeMap<String, i64> {
        m.into_iter().map(|(k, v)| (k, v.orders)).collect()
    };

    let mut data = json!({ "total_orders": b.totals.orders });
    if let Some(by_status) = b.by_status {
        data["by_status"] = json!(counts(by_status));
    }
    if let Some(by_marketplace) = b.by_marketplace {
        data["by_marketplace"] = json!(counts(by_marketplace));
    }
    Ok(Computed::new(filter.clone(), data))
}

pub async fn total_sales(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let b = breakdowns(ctx, filter).await?;

    let mut data = json!({
        "total_orders": b.totals.orders,
        "total_revenue": round2(b.totals.revenue),
    });
    if let Some(by_status) = b.by_status {
        data["by_status"] = json!(by_status);
    }
    if let Some(by_marketplace) = b.by_marketplace {
        data["by_marketplace"] = json!(by_marketplace);
    }
    Ok(Computed::new(filter.clone(), data))
}

pub async fn average_ticket(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[]).await?;
    let totals = Totals::of(&rows);

    let n = totals.orders as f64;
    let (mean, std_dev) = if totals.orders > 0 {
        let mean = totals.revenue / n;
        let variance = (totals.sum_squares / n - mean * mean).max(0.0);
        (mean, variance.sqrt())
    } else {
        (0.0, 0.0)
    };

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "average_ticket": round2(mean),
        "std_deviation": round2(std_dev),
        "min_ticket": totals.min_amount.map(round2),
        "max_ticket": totals.max_amount.map(round2),
    });
    Ok(Computed::new(filter.clone(), data))
}

/// KPI overview. Status filters do not apply: the KPIs are per status.
pub async fn sales_summary(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let filter = filter.without_status();
    let rows = ctx.aggregate(&filter, &[Dimension::Status]).await?;

    let all = Totals::of(&rows);
    let paid = Totals::of(rows.iter().filter(|r| is_paid(r.key(0))));
    let cancelled = Totals::of(rows.iter().filter(|r| is_cancelled(r.key(0))));

    let data = json!({
        "total_orders": all.orders,
        "total_revenue": round2(all.revenue),
        "paid_orders": paid.orders,
        "paid_revenue": round2(paid.revenue),
        "average_paid_ticket": paid.average(),
        "cancelled_orders": cancelled.orders,
        "cancellation_rate": percentage(cancelled.orders as f64, all.orders as f64),
        "conversion_rate": percentage(paid.orders as f64, all.orders as f64),
    });
    Ok(Computed::new(filter, data))
}

#[derive(Debug, Serialize)]
struct StatusShare {
    status: String,
    orders: i64,
    revenue: f64,
    percentage: f64,
}

pub async fn orders_by_status(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[Dimension::Status]).await?;
    let totals = Totals::of(&rows);

    let mut statuses: Vec<StatusShare> = buckets_by_key(&rows, 0)
        .into_iter()
        .map(|(status, b)| StatusShare {
            status,
            orders: b.orders,
            revenue: b.revenue,
            percentage: percentage(b.orders as f64, totals.orders as f64),
        })
        .collect();
    statuses.sort_by(|a, b| b.orders.cmp(&a.orders).then_with(|| a.status.cmp(&b.status)));

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "statuses": statuses,
    });
    Ok(Computed::new(filter.clone(), data))
}

#[derive(Debug, Serialize)]
struct MarketplaceShare {
    marketplace: String,
    orders: i64,
    revenue: f64,
    percentage: f64,
    average_ticket: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    by_status: Option<BTreeMap<String, Bucket>>,
}

pub async fn orders_by_marketplace(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
) -> Result<Computed> {
    let nested = filter.status.is_none();
    let dims: &[Dimension] = if nested {
        &[Dimension::Marketplace, Dimension::Status]
    } else {
        &[Dimension::Marketplace]
    };
    let rows = ctx.aggregate(filter, dims).await?;
    let totals = Totals::of(&rows);

    let mut grouped: BTreeMap<String, (Bucket, BTreeMap<String, Bucket>)> = BTreeMap::new();
    for row in &rows {
        let entry = grouped.entry(row.key(0).to_string()).or_default();
        entry.0.add(row.orders, row.revenue);
        if nested {
            entry
                .1
                .entry(row.key(1).to_string())
                .or_default()
                .add(row.orders, row.revenue);
        }
    }

    let mut marketplaces: Vec<MarketplaceShare> = grouped
        .into_iter()
        .map(|(marketplace, (bucket, statuses))| MarketplaceShare {
            marketplace,
            orders: bucket.orders,
            revenue: round2(bucket.revenue),
            percentage: percentage(bucket.orders as f64, totals.orders as f64),
            average_ticket: ratio(bucket.revenue, bucket.orders as f64),
            by_status: nested
                .then(|| statuses.into_iter().map(|(k, b)| (k, b.rounded())).collect()),
        })
        .collect();
    marketplaces.sort_by(|a, b| {
        b.revenue
            .partial_cmp(&a.revenue)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.marketplace.cmp(&b.marketplace))
    });

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "marketplaces": marketplaces,
    });
    Ok(Computed::new(filter.clone(), data))
}
