//! Calendar time series and rankings.

use super::sales::{buckets_by_key, Bucket};
use super::{growth, Computed, QueryContext, Totals};
use crate::error::{AnalyticsError, Result};
use crate::filters::{month_key, month_keys_between, NormalizedFilter};
use crate::models::{percentage, ratio, round2, QueryParams, RankMetric, RankOrder};
use crate::store::Dimension;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Default and maximum `limit` of `top_days`.
pub const DEFAULT_TOP_DAYS: u32 = 5;
pub const MAX_TOP_DAYS: u32 = 100;

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

fn monday_of(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

fn parse_day(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

/// Bucket keys to emit: the whole filtered range when there is one,
/// otherwise the span between the first and last key with data.
fn month_axis(filter: &NormalizedFilter, buckets: &BTreeMap<String, Bucket>) -> Vec<String> {
    match filter.range {
        Some(range) => month_keys_between(
            &month_key(range.start.year(), range.start.month()),
            &month_key(range.end.year(), range.end.month()),
        ),
        None => match (buckets.keys().next(), buckets.keys().next_back()) {
            (Some(first), Some(last)) => month_keys_between(first, last),
            _ => Vec::new(),
        },
    }
}

fn week_axis(filter: &NormalizedFilter, buckets: &BTreeMap<String, Bucket>) -> Vec<NaiveDate> {
    let bounds = match filter.range {
        Some(range) => Some((monday_of(range.start), monday_of(range.end))),
        None => buckets
            .keys()
            .next()
            .and_then(|k| parse_day(k))
            .zip(buckets.keys().next_back().and_then(|k| parse_day(k))),
    };

    let mut weeks = Vec::new();
    if let Some((mut cursor, last)) = bounds {
        while cursor <= last {
            weeks.push(cursor);
            cursor += Duration::days(7);
        }
    }
    weeks
}

#[derive(Debug, Serialize)]
struct MonthPoint {
    month: String,
    orders: i64,
    revenue: f64,
    average_ticket: f64,
    growth_percentage: Option<f64>,
}

/// Month-over-month series; months without orders are emitted as zeros.
pub async fn monthly_sales(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[Dimension::Month]).await?;
    let totals = Totals::of(&rows);
    let buckets = buckets_by_key(&rows, 0);

    let mut previous: Option<Bucket> = None;
    let months: Vec<MonthPoint> = month_axis(filter, &buckets)
        .into_iter()
        .map(|month| {
            let bucket = buckets.get(&month).copied().unwrap_or_default();
            let growth_percentage =
                previous.and_then(|p| growth(bucket.revenue, p.orders, p.revenue));
            previous = Some(bucket);
            MonthPoint {
                month,
                orders: bucket.orders,
                revenue: bucket.revenue,
                average_ticket: ratio(bucket.revenue, bucket.orders as f64),
                growth_percentage,
            }
        })
        .collect();

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "average_monthly_revenue": ratio(totals.revenue, months.len() as f64),
        "months": months,
    });
    Ok(Computed::new(filter.clone(), data))
}

#[derive(Debug, Serialize)]
struct WeekPoint {
    week_start: String,
    orders: i64,
    revenue: f64,
    growth_percentage: Option<f64>,
}

/// Week-over-week series, weeks starting on Monday.
pub async fn weekly_sales(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[Dimension::Week]).await?;
    let totals = Totals::of(&rows);
    let buckets = buckets_by_key(&rows, 0);

    let mut previous: Option<Bucket> = None;
    let weeks: Vec<WeekPoint> = week_axis(filter, &buckets)
        .into_iter()
        .map(|monday| {
            let week_start = monday.format("%Y-%m-%d").to_string();
            let bucket = buckets.get(&week_start).copied().unwrap_or_default();
            let growth_percentage =
                previous.and_then(|p| growth(bucket.revenue, p.orders, p.revenue));
            previous = Some(bucket);
            WeekPoint {
                week_start,
                orders: bucket.orders,
                revenue: bucket.revenue,
                growth_percentage,
            }
        })
        .collect();

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "weeks": weeks,
    });
    Ok(Computed::new(filter.clone(), data))
}

#[derive(Debug, Serialize)]
struct DayPoint {
    date: String,
    orders: i64,
    revenue: f64,
}

/// Days with at least one order, oldest first.
pub async fn daily_sales(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[Dimension::Day]).await?;
    let totals = Totals::of(&rows);

    let days: Vec<DayPoint> = buckets_by_key(&rows, 0)
        .into_iter()
        .map(|(date, b)| DayPoint {
            date,
            orders: b.orders,
            revenue: b.revenue,
        })
        .collect();

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "active_days": days.len(),
        "average_revenue_per_active_day": ratio(totals.revenue, days.len() as f64),
        "days": days,
    });
    Ok(Computed::new(filter.clone(), data))
}

#[derive(Debug, Serialize)]
struct HourPoint {
    hour: u32,
    orders: i64,
    revenue: f64,
    percentage: f64,
}

/// All 24 business-time hours; `percentage` is the share of orders.
pub async fn sales_by_hour(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[Dimension::Hour]).await?;
    let totals = Totals::of(&rows);
    let buckets = buckets_by_key(&rows, 0);

    let hours: Vec<HourPoint> = (0..24u32)
        .map(|hour| {
            let bucket = buckets
                .get(&format!("{:02}", hour))
                .copied()
                .unwrap_or_default();
            HourPoint {
                hour,
                orders: bucket.orders,
                revenue: bucket.revenue,
                percentage: percentage(bucket.orders as f64, totals.orders as f64),
            }
        })
        .collect();

    // earliest hour wins ties
    let peak_hour = hours
        .iter()
        .filter(|h| h.orders > 0)
        .fold(None::<&HourPoint>, |best, h| match best {
            Some(b) if b.orders >= h.orders => Some(b),
            _ => Some(h),
        })
        .map(|h| h.hour);

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "peak_hour": peak_hour,
        "hours": hours,
    });
    Ok(Computed::new(filter.clone(), data))
}

#[derive(Debug, Serialize)]
struct WeekdayPoint {
    weekday: u32,
    name: &'static str,
    orders: i64,
    revenue: f64,
    average_ticket: f64,
}

/// Sunday through Saturday; `best_weekday` is the one with most revenue.
pub async fn sales_by_weekday(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
) -> Result<Computed> {
    let rows = ctx.aggregate(filter, &[Dimension::Weekday]).await?;
    let totals = Totals::of(&rows);
    let buckets = buckets_by_key(&rows, 0);

    let weekdays: Vec<WeekdayPoint> = WEEKDAY_NAMES
        .into_iter()
        .zip(0u32..)
        .map(|(name, weekday)| {
            let bucket = buckets
                .get(&weekday.to_string())
                .copied()
                .unwrap_or_default();
            WeekdayPoint {
                weekday,
                name,
                orders: bucket.orders,
                revenue: bucket.revenue,
                average_ticket: ratio(bucket.revenue, bucket.orders as f64),
            }
        })
        .collect();

    let best_weekday = weekdays
        .iter()
        .filter(|w| w.orders > 0)
        .fold(None::<&WeekdayPoint>, |best, w| match best {
            Some(b) if b.revenue >= w.revenue => Some(b),
            _ => Some(w),
        })
        .map(|w| w.name);

    let data = json!({
        "total_orders": totals.orders,
        "total_revenue": round2(totals.revenue),
        "best_weekday": best_weekday,
        "weekdays": weekdays,
    });
    Ok(Computed::new(filter.clone(), data))
}

#[derive(Debug, Serialize)]
struct RankedDay {
    rank: usize,
    date: String,
    orders: i64,
    revenue: f64,
}

/// Best or worst days by revenue or order count. Only days with orders
/// are ranked; ties go to the earlier date.
pub async fn top_days(
    ctx: &QueryContext<'_>,
    filter: &NormalizedFilter,
    params: &QueryParams,
) -> Result<Computed> {
    let limit = params.limit.unwrap_or(DEFAULT_TOP_DAYS);
    if !(1..=MAX_TOP_DAYS).contains(&limit) {
        return Err(AnalyticsError::validation(
            "limit",
            format!("limit must be between 1 and {}, got {}", MAX_TOP_DAYS, limit),
        ));
    }
    let metric = params.metric.unwrap_or_default();
    let order = params.order.unwrap_or_default();

    let rows = ctx.aggregate(filter, &[Dimension::Day]).await?;
    let mut days: Vec<(String, Bucket)> = buckets_by_key(&rows, 0).into_iter().collect();

    let value = |b: &Bucket| match metric {
        RankMetric::Revenue => b.revenue,
        RankMetric::Orders => b.orders as f64,
    };
    days.sort_by(|(da, a), (db, b)| {
        let by_value = value(a).partial_cmp(&value(b)).unwrap_or(Ordering::Equal);
        let by_value = match order {
            RankOrder::Best => by_value.reverse(),
            RankOrder::Worst => by_value,
        };
        by_value.then_with(|| da.cmp(db))
    });

    let ranked: Vec<RankedDay> = days
        .into_iter()
        .take(limit as usize)
        .enumerate()
        .map(|(i, (date, b))| RankedDay {
            rank: i + 1,
            date,
            orders: b.orders,
            revenue: b.revenue,
        })
        .collect();

    let data = json!({
        "metric": metric,
        "order": order,
        "limit": limit,
        "days": ranked,
    });
    Ok(Computed::new(filter.clone(), data))
}
