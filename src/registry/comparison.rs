//! Rates and side-by-side comparisons.

use super::{growth, Computed, QueryContext, Totals};
use crate::error::{AnalyticsError, Result};
use crate::filters::{business_today, days_in_month, month_key, DateRange, NormalizedFilter};
use crate::models::{is_cancelled, is_paid, percentage, round2, QueryParams};
use crate::store::{AggregateRow, Dimension};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Status mix of one group of rows.
#[derive(Debug, Clone, Copy, Default)]
struct StatusMix {
    all: Totals,
    paid: Totals,
    cancelled: Totals,
}

impl StatusMix {
    /// `status_index` is the position of the status key in each row.
    fn of<'r>(rows: impl IntoIterator<Item = &'r AggregateRow> + Clone, status_index: usize) -> Self {
        StatusMix {
            all: Totals::of(rows.clone()),
            paid: Totals::of(rows.clone().into_iter().filter(|r| is_paid(r.key(status_index)))),
            cancelled: Totals::of(
                rows.into_iter()
                    .filter(|r| is_cancelled(r.key(status_index))),
            ),
        }
    }

    fn cancellation_rate(&self) -> f64 {
        percentage(self.cancelled.orders as f64, self.all.orders as f64)
    }

    fn conversion_rate(&self) -> f64 {
        percentage(self.paid.orders as f64, self.all.orders as f64)
    }
}

fn group_by_first_key(rows: &[AggregateRow]) -> BTreeMap<&str, Vec<&AggregateRow>> {
    let mut groups: BTreeMap<&str, Vec<&AggregateRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.key(0)).or_default().push(row);
    }
    groups
}

#[derive(Debug, Serialize)]
struct MarketplaceCancellations {
    marketplace: String,
    orders: i64,
    cancelled_orders: i64,
    cancellation_rate: f64,
}

/// Share of cancelled orders. Status filters do not apply.
pub async fn cancellation_rate(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
) -> Result<Computed> {
    let filter = filter.without_status();
    let per_marketplace = filter.marketplace.is_none();

    let (mix, by_marketplace) = if per_marketplace {
        let rows = ctx
            .aggregate(&filter, &[Dimension::Marketplace, Dimension::Status])
            .await?;
        let mut breakdown: Vec<MarketplaceCancellations> = group_by_first_key(&rows)
            .into_iter()
            .map(|(marketplace, group)| {
                let mix = StatusMix::of(group.iter().copied(), 1);
                MarketplaceCancellations {
                    marketplace: marketplace.to_string(),
                    orders: mix.all.orders,
                    cancelled_orders: mix.cancelled.orders,
                    cancellation_rate: mix.cancellation_rate(),
                }
            })
            .collect();
        breakdown.sort_by(|a, b| {
            b.cancellation_rate
                .partial_cmp(&a.cancellation_rate)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.marketplace.cmp(&b.marketplace))
        });
        (StatusMix::of(rows.iter(), 1), Some(breakdown))
    } else {
        let rows = ctx.aggregate(&filter, &[Dimension::Status]).await?;
        (StatusMix::of(rows.iter(), 0), None)
    };

    let mut data = json!({
        "total_orders": mix.all.orders,
        "cancelled_orders": mix.cancelled.orders,
        "cancelled_revenue": round2(mix.cancelled.revenue),
        "cancellation_rate": mix.cancellation_rate(),
    });
    if let Some(by_marketplace) = by_marketplace {
        data["by_marketplace"] = json!(by_marketplace);
    }
    Ok(Computed::new(filter, data))
}

#[derive(Debug, Serialize)]
struct MarketplaceRow {
    marketplace: String,
    orders: i64,
    paid_orders: i64,
    /// Paid revenue.
    revenue: f64,
    revenue_share: f64,
    average_ticket: f64,
    cancellation_rate: f64,
    conversion_rate: f64,
}

/// One row per marketplace, highest paid revenue first.
pub async fn compare_marketplaces(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
) -> Result<Computed> {
    let filter = filter.without_status();
    let rows = ctx
        .aggregate(&filter, &[Dimension::Marketplace, Dimension::Status])
        .await?;
    let overall = StatusMix::of(rows.iter(), 1);

    let mut marketplaces: Vec<MarketplaceRow> = group_by_first_key(&rows)
        .into_iter()
        .map(|(marketplace, group)| {
            let mix = StatusMix::of(group.iter().copied(), 1);
            MarketplaceRow {
                marketplace: marketplace.to_string(),
                orders: mix.all.orders,
                paid_orders: mix.paid.orders,
                revenue: round2(mix.paid.revenue),
                revenue_share: percentage(mix.paid.revenue, overall.paid.revenue),
                average_ticket: mix.paid.average(),
                cancellation_rate: mix.cancellation_rate(),
                conversion_rate: mix.conversion_rate(),
            }
        })
        .collect();
    marketplaces.sort_by(|a, b| {
        b.revenue
            .partial_cmp(&a.revenue)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.marketplace.cmp(&b.marketplace))
    });

    let data = json!({
        "total_orders": overall.all.orders,
        "total_paid_revenue": round2(overall.paid.revenue),
        "marketplaces": marketplaces,
    });
    Ok(Computed::new(filter, data))
}

/// Summary of one side of a comparison.
#[derive(Debug, Clone, Serialize)]
struct PeriodSummary {
    start_date: String,
    end_date: String,
    orders: i64,
    revenue: f64,
    paid_orders: i64,
    paid_revenue: f64,
    average_ticket: f64,
    cancellation_rate: f64,
}

impl PeriodSummary {
    fn new(range: DateRange, mix: &StatusMix) -> Self {
        PeriodSummary {
            start_date: range.start.to_string(),
            end_date: range.end.to_string(),
            orders: mix.all.orders,
            revenue: round2(mix.all.revenue),
            paid_orders: mix.paid.orders,
            paid_revenue: round2(mix.paid.revenue),
            average_ticket: mix.all.average(),
            cancellation_rate: mix.cancellation_rate(),
        }
    }
}

/// Current and previous status mixes, fetched concurrently.
async fn mixes_for(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
    current: DateRange,
    previous: DateRange,
) -> Result<(StatusMix, StatusMix)> {
    let current_filter = filter.with_range(Some(current));
    let previous_filter = filter.with_range(Some(previous));
    let (current_rows, previous_rows) = futures::try_join!(
        ctx.aggregate(&current_filter, &[Dimension::Status]),
        ctx.aggregate(&previous_filter, &[Dimension::Status]),
    )?;
    Ok((
        StatusMix::of(current_rows.iter(), 0),
        StatusMix::of(previous_rows.iter(), 0),
    ))
}

/// The selected range against the preceding range of the same length.
pub async fn compare_periods(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let Some(range) = filter.range else {
        return Err(AnalyticsError::validation(
            "date_mode",
            "compare_periods needs a date range (start_date/end_date, period_days or current_month)",
        ));
    };
    let previous = range.previous_period();
    let (cur, prev) = mixes_for(ctx, filter, range, previous).await?;

    let data = json!({
        "current": PeriodSummary::new(range, &cur),
        "previous": PeriodSummary::new(previous, &prev),
        "orders_change_percentage": growth(cur.all.orders as f64, prev.all.orders, prev.all.orders as f64),
        "revenue_change_percentage": growth(cur.all.revenue, prev.all.orders, prev.all.revenue),
        "paid_revenue_change_percentage": growth(cur.paid.revenue, prev.paid.orders, prev.paid.revenue),
        "average_ticket_change_percentage": growth(cur.all.average(), prev.all.orders, prev.all.average()),
    });
    Ok(Computed::new(filter.clone(), data))
}

/// Day of `(year, month)` matching `day`, clamped to the month's length.
fn aligned_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day.min(days_in_month(year, month)))
}

/// A calendar month against the same month one year earlier. While the
/// month is in progress both sides are cut at the same day of the month.
pub async fn year_over_year(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
    params: &QueryParams,
) -> Result<Computed> {
    let today = business_today(ctx.clock());
    let year = params.year.unwrap_or(today.year());
    let month = params.month.unwrap_or(today.month());

    if !(1..=12).contains(&month) {
        return Err(AnalyticsError::validation(
            "month",
            format!("month must be between 1 and 12, got {}", month),
        ));
    }
    if year < 1 {
        return Err(AnalyticsError::validation("year", format!("invalid year {}", year)));
    }
    if (year, month) > (today.year(), today.month()) {
        return Err(AnalyticsError::validation(
            "month",
            format!("{} is in the future", month_key(year, month)),
        ));
    }

    let month_to_date = (year, month) == (today.year(), today.month());
    let last_day = if month_to_date {
        today.day()
    } else {
        days_in_month(year, month)
    };

    let invalid = || AnalyticsError::validation("year", format!("invalid year {}", year));
    let current = DateRange::new(
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?,
        aligned_day(year, month, last_day).ok_or_else(invalid)?,
    )?;
    let previous = DateRange::new(
        NaiveDate::from_ymd_opt(year - 1, month, 1).ok_or_else(invalid)?,
        aligned_day(year - 1, month, last_day).ok_or_else(invalid)?,
    )?;

    let filter = filter.with_range(None);
    let (cur, prev) = mixes_for(ctx, &filter, current, previous).await?;

    let data = json!({
        "month": month_key(year, month),
        "previous_month": month_key(year - 1, month),
        "month_to_date": month_to_date,
        "current": PeriodSummary::new(current, &cur),
        "previous": PeriodSummary::new(previous, &prev),
        "orders_change_percentage": growth(cur.all.orders as f64, prev.all.orders, prev.all.orders as f64),
        "revenue_change_percentage": growth(cur.all.revenue, prev.all.orders, prev.all.revenue),
    });
    Ok(Computed::new(filter.with_range(Some(current)), data))
}
