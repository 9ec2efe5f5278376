//! Health-check alerting.
//!
//! Independent rules with static thresholds, evaluated on the current
//! business month against up to six complete months of history.

use super::forecast::extrapolate_month;
use crate::error::Result;
use crate::filters::{
    business_today, days_in_month, month_key, month_keys_between, previous_month, DateRange,
    NormalizedFilter,
};
use crate::models::{change_percentage, is_cancelled, is_paid, percentage, round2};
use crate::registry::{Computed, QueryContext};
use crate::store::{AggregateRow, Dimension};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Complete months of history considered.
pub const HISTORY_MONTHS: u32 = 6;
/// Fewer history months than this yields a single informational alert.
pub const MIN_HISTORY_MONTHS: usize = 2;

const PROJECTION_DANGER: f64 = -30.0;
const PROJECTION_WARNING: f64 = -10.0;
const PROJECTION_SUCCESS: f64 = 20.0;
const YOY_THRESHOLD: f64 = 15.0;
const CANCELLATION_DANGER_PP: f64 = 5.0;
const CANCELLATION_SUCCESS_PP: f64 = -3.0;
const CANCELLATION_MIN_ORDERS: i64 = 20;
const MARKETPLACE_SPIKE_PP: f64 = 8.0;
const MARKETPLACE_MIN_ORDERS: i64 = 10;
const TRAILING_WEEK_SPIKE: f64 = 30.0;
const TRAILING_WEEK_MIN_ORDERS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Danger,
    Warning,
    Success,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Danger => write!(f, "danger"),
            Severity::Warning => write!(f, "warning"),
            Severity::Success => write!(f, "success"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Danger => "🔴",
            Severity::Warning => "🟡",
            Severity::Success => "🟢",
            Severity::Info => "🔵",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: Severity,
    /// Stable identifier of the rule that fired.
    pub rule: &'static str,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Alert {
    fn new(severity: Severity, rule: &'static str, title: &str, message: String) -> Self {
        Alert {
            severity,
            rule,
            title: title.to_string(),
            message,
            value: None,
        }
    }

    fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Counts of one group of rows.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    orders: i64,
    paid_orders: i64,
    paid_revenue: f64,
    cancelled: i64,
}

impl Tally {
    fn add(&mut self, row: &AggregateRow, status: &str) {
        self.orders += row.orders;
        if is_paid(status) {
            self.paid_orders += row.orders;
            self.paid_revenue += row.revenue;
        }
        if is_cancelled(status) {
            self.cancelled += row.orders;
        }
    }

    fn merge(&mut self, other: &Tally) {
        self.orders += other.orders;
        self.paid_orders += other.paid_orders;
        self.paid_revenue += other.paid_revenue;
        self.cancelled += other.cancelled;
    }

    fn cancellation_rate(&self) -> f64 {
        percentage(self.cancelled as f64, self.orders as f64)
    }

    fn ticket(&self) -> Option<f64> {
        (self.paid_orders > 0).then(|| self.paid_revenue / self.paid_orders as f64)
    }
}

fn tally_by_status(rows: &[AggregateRow]) -> Tally {
    let mut tally = Tally::default();
    for row in rows {
        tally.add(row, row.key(0));
    }
    tally
}

/// Everything the rules look at.
struct Snapshot {
    today: NaiveDate,
    current_key: String,
    current: Tally,
    /// Oldest first; leading months without orders are dropped.
    history: Vec<(String, Tally)>,
    current_by_marketplace: BTreeMap<String, Tally>,
    previous_by_marketplace: BTreeMap<String, Tally>,
    last_year: Tally,
    trailing_week: Tally,
}

impl Snapshot {
    fn days_in_current_month(&self) -> u32 {
        days_in_month(self.today.year(), self.today.month())
    }

    fn projected_revenue(&self) -> f64 {
        extrapolate_month(
            self.current.paid_revenue,
            self.today.day(),
            self.days_in_current_month(),
        )
    }

    fn history_total(&self) -> Tally {
        let mut total = Tally::default();
        for (_, t) in &self.history {
            total.merge(t);
        }
        total
    }

    fn history_average_revenue(&self) -> f64 {
        self.history_total().paid_revenue / self.history.len().max(1) as f64
    }

    fn history_days(&self) -> u32 {
        self.history
            .iter()
            .filter_map(|(k, _)| crate::filters::parse_month_key(k))
            .map(|(y, m)| days_in_month(y, m))
            .sum()
    }
}

async fn snapshot(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Snapshot> {
    let today = business_today(ctx.clock());
    let (year, month) = (today.year(), today.month());
    let current_key = month_key(year, month);

    let mut first = (year, month);
    for _ in 0..HISTORY_MONTHS {
        first = previous_month(first.0, first.1);
    }
    let window_start = NaiveDate::from_ymd_opt(first.0, first.1, 1).unwrap_or(today);
    let window = filter.with_range(Some(DateRange::new(window_start, today)?));

    let last_year_end = NaiveDate::from_ymd_opt(
        year - 1,
        month,
        today.day().min(days_in_month(year - 1, month)),
    );
    let last_year_start = NaiveDate::from_ymd_opt(year - 1, month, 1);
    let last_year = match (last_year_start, last_year_end) {
        (Some(start), Some(end)) => Some(DateRange::new(start, end)?),
        _ => None,
    };
    let last_year_filter = filter.with_range(last_year);
    let week_filter = filter.with_range(Some(DateRange::new(today - Duration::days(6), today)?));

    let (window_rows, last_year_rows, week_rows) = futures::try_join!(
        ctx.aggregate(
            &window,
            &[Dimension::Month, Dimension::Marketplace, Dimension::Status]
        ),
        ctx.aggregate(&last_year_filter, &[Dimension::Status]),
        ctx.aggregate(&week_filter, &[Dimension::Status]),
    )?;

    let mut months: BTreeMap<String, Tally> = BTreeMap::new();
    let mut by_marketplace: BTreeMap<(String, String), Tally> = BTreeMap::new();
    for row in &window_rows {
        let status = row.key(2);
        months.entry(row.key(0).to_string()).or_default().add(row, status);
        by_marketplace
            .entry((row.key(0).to_string(), row.key(1).to_string()))
            .or_default()
            .add(row, status);
    }

    let (prev_year, prev_month) = previous_month(year, month);
    let previous_key = month_key(prev_year, prev_month);
    let history: Vec<(String, Tally)> =
        month_keys_between(&month_key(first.0, first.1), &previous_key)
            .into_iter()
            .map(|k| {
                let tally = months.get(&k).copied().unwrap_or_default();
                (k, tally)
            })
            .skip_while(|(_, t)| t.orders == 0)
            .collect();

    let marketplaces_of = |key: &str| -> BTreeMap<String, Tally> {
        by_marketplace
            .iter()
            .filter(|((m, _), _)| m == key)
            .map(|((_, mp), t)| (mp.clone(), *t))
            .collect()
    };

    Ok(Snapshot {
        today,
        current: months.get(&current_key).copied().unwrap_or_default(),
        current_by_marketplace: marketplaces_of(&current_key),
        previous_by_marketplace: marketplaces_of(&previous_key),
        current_key,
        history,
        last_year: if last_year.is_some() {
            tally_by_status(&last_year_rows)
        } else {
            Tally::default()
        },
        trailing_week: tally_by_status(&week_rows),
    })
}

fn projection_rule(s: &Snapshot) -> Option<Alert> {
    let projected = s.projected_revenue();
    let variance = change_percentage(projected, s.history_average_revenue())?;
    let (severity, title) = if variance < PROJECTION_DANGER {
        (Severity::Danger, "Revenue well below recent months")
    } else if variance < PROJECTION_WARNING {
        (Severity::Warning, "Revenue below recent months")
    } else if variance > PROJECTION_SUCCESS {
        (Severity::Success, "Revenue above recent months")
    } else {
        return None;
    };
    Some(
        Alert::new(
            severity,
            "revenue_projection",
            title,
            format!(
                "At the current pace {} closes at {:.2} in paid revenue, {:+.2}% against the {}-month average of {:.2}.",
                s.current_key,
                projected,
                variance,
                s.history.len(),
                s.history_average_revenue()
            ),
        )
        .with_value(variance),
    )
}

fn year_over_year_rule(s: &Snapshot) -> Option<Alert> {
    if s.last_year.paid_orders == 0 {
        return None;
    }
    let change = change_percentage(s.current.paid_revenue, s.last_year.paid_revenue)?;
    if change.abs() <= YOY_THRESHOLD {
        return None;
    }
    let (severity, title) = if change > 0.0 {
        (Severity::Success, "Ahead of the same month last year")
    } else {
        (Severity::Warning, "Behind the same month last year")
    };
    Some(
        Alert::new(
            severity,
            "year_over_year",
            title,
            format!(
                "Paid revenue up to day {} is {:.2} against {:.2} a year ago ({:+.2}%).",
                s.today.day(),
                s.current.paid_revenue,
                s.last_year.paid_revenue,
                change
            ),
        )
        .with_value(change),
    )
}

fn cancellation_rule(s: &Snapshot) -> Option<Alert> {
    if s.current.orders < CANCELLATION_MIN_ORDERS {
        return None;
    }
    let current = s.current.cancellation_rate();
    let baseline = s.history_total().cancellation_rate();
    let delta = round2(current - baseline);
    let (severity, title) = if delta >= CANCELLATION_DANGER_PP {
        (Severity::Danger, "Cancellations rising")
    } else if delta <= CANCELLATION_SUCCESS_PP {
        (Severity::Success, "Cancellations falling")
    } else {
        return None;
    };
    Some(
        Alert::new(
            severity,
            "cancellation_rate",
            title,
            format!(
                "Cancellation rate is {:.2}% this month against {:.2}% in recent months ({:+.2} pp).",
                current, baseline, delta
            ),
        )
        .with_value(delta),
    )
}

fn marketplace_spike_rule(s: &Snapshot) -> Vec<Alert> {
    s.current_by_marketplace
        .iter()
        .filter_map(|(marketplace, current)| {
            let previous = s.previous_by_marketplace.get(marketplace)?;
            if current.orders < MARKETPLACE_MIN_ORDERS || previous.orders < MARKETPLACE_MIN_ORDERS {
                return None;
            }
            let delta = round2(current.cancellation_rate() - previous.cancellation_rate());
            (delta >= MARKETPLACE_SPIKE_PP).then(|| {
                Alert::new(
                    Severity::Warning,
                    "marketplace_cancellation_spike",
                    &format!("Cancellation spike on {}", marketplace),
                    format!(
                        "{} cancellations went from {:.2}% last month to {:.2}% ({:+.2} pp).",
                        marketplace,
                        previous.cancellation_rate(),
                        current.cancellation_rate(),
                        delta
                    ),
                )
                .with_value(delta)
            })
        })
        .collect()
}

fn ticket_trend_rule(s: &Snapshot) -> Option<Alert> {
    let n = s.history.len();
    if n < 3 {
        return None;
    }
    let tickets: Vec<f64> = s.history[n - 3..]
        .iter()
        .map(|(_, t)| t.ticket())
        .collect::<Option<Vec<f64>>>()?;
    let (a, b, c) = (tickets[0], tickets[1], tickets[2]);

    let (severity, title, direction) = if a < b && b < c {
        (Severity::Success, "Average ticket rising", "risen")
    } else if a > b && b > c {
        (Severity::Warning, "Average ticket falling", "fallen")
    } else {
        return None;
    };
    Some(
        Alert::new(
            severity,
            "average_ticket_trend",
            title,
            format!(
                "The average paid ticket has {} for three months in a row: {:.2}, {:.2}, {:.2}.",
                direction, a, b, c
            ),
        )
        .with_value(round2(c)),
    )
}

fn trailing_week_rule(s: &Snapshot) -> Option<Alert> {
    if s.trailing_week.paid_orders < TRAILING_WEEK_MIN_ORDERS {
        return None;
    }
    let days = s.history_days();
    if days == 0 {
        return None;
    }
    let average_week = s.history_total().paid_revenue / f64::from(days) * 7.0;
    let change = change_percentage(s.trailing_week.paid_revenue, average_week)?;
    (change >= TRAILING_WEEK_SPIKE).then(|| {
        Alert::new(
            Severity::Success,
            "trailing_week",
            "Strong last 7 days",
            format!(
                "The last 7 days brought {:.2} in paid revenue, {:+.2}% over an average week ({:.2}).",
                s.trailing_week.paid_revenue, change, average_week
            ),
        )
        .with_value(change)
    })
}

/// Evaluate every rule; at least one alert is always returned.
fn evaluate(s: &Snapshot) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = [
        projection_rule(s),
        year_over_year_rule(s),
        cancellation_rule(s),
        ticket_trend_rule(s),
        trailing_week_rule(s),
    ]
    .into_iter()
    .flatten()
    .chain(marketplace_spike_rule(s))
    .collect();

    if alerts.is_empty() {
        alerts.push(Alert::new(
            Severity::Info,
            "nothing_anomalous",
            "Nothing anomalous",
            format!("No rule fired for {}.", s.current_key),
        ));
    }
    alerts.sort_by_key(|a| a.severity);
    alerts
}

fn build_summary(s: &Snapshot, alerts: &[Alert]) -> Value {
    let history_average = s.history_average_revenue();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for alert in alerts {
        *counts.entry(alert.severity.to_string()).or_default() += 1;
    }
    json!({
        "month": s.current_key,
        "days_elapsed": s.today.day(),
        "days_in_month": s.days_in_current_month(),
        "revenue_so_far": round2(s.current.paid_revenue),
        "projected_revenue": round2(s.projected_revenue()),
        "history_months": s.history.len(),
        "history_average_revenue": round2(history_average),
        "projection_variance_percentage": change_percentage(s.projected_revenue(), history_average),
        "current_cancellation_rate": s.current.cancellation_rate(),
        "history_cancellation_rate": s.history_total().cancellation_rate(),
        "average_ticket": round2(s.current.ticket().unwrap_or(0.0)),
        "alerts_by_severity": counts,
    })
}

pub async fn health_check(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let filter = filter.without_status().with_range(None);
    let s = snapshot(ctx, &filter).await?;

    let (alerts, summary) = if s.history.len() < MIN_HISTORY_MONTHS {
        let alert = Alert::new(
            Severity::Info,
            "insufficient_history",
            "Not enough history",
            format!(
                "Health checks need at least {} complete months of orders; {} available.",
                MIN_HISTORY_MONTHS,
                s.history.len()
            ),
        );
        (vec![alert], Value::Null)
    } else {
        let alerts = evaluate(&s);
        let summary = build_summary(&s, &alerts);
        (alerts, summary)
    };

    let data = json!({
        "alerts": alerts,
        "summary": summary,
    });
    Ok(Computed::new(filter, data))
}
