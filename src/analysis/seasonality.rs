//! Seasonal index per calendar month.

use super::{paid_history_filter, paid_monthly_series, MonthlyPoint};
use crate::error::{AnalyticsError, Result};
use crate::filters::{business_today, month_key, NormalizedFilter};
use crate::models::round2;
use crate::registry::{Computed, QueryContext};
use chrono::Datelike;
use serde::Serialize;
use serde_json::json;

/// Complete months needed before an index means anything.
pub const MIN_COMPLETE_MONTHS: usize = 3;

pub const STRONG_INDEX: f64 = 120.0;
pub const WEAK_INDEX: f64 = 90.0;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Strong,
    Normal,
    Weak,
}

impl Season {
    pub fn classify(index: f64) -> Self {
        if index >= STRONG_INDEX {
            Season::Strong
        } else if index < WEAK_INDEX {
            Season::Weak
        } else {
            Season::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthIndex {
    pub month: u32,
    pub name: &'static str,
    pub average_revenue: f64,
    pub samples: usize,
    pub index: f64,
    pub classification: Season,
}

/// Index of every calendar month present in `points`.
///
/// Each calendar month is averaged across years; the index is that average
/// over the mean of the monthly averages, times 100.
pub fn seasonal_indices(points: &[MonthlyPoint]) -> Vec<MonthIndex> {
    let mut sums = [(0.0f64, 0usize); 12];
    for p in points {
        let slot = &mut sums[(p.month_number - 1) as usize];
        slot.0 += p.revenue;
        slot.1 += 1;
    }

    let averages: Vec<(u32, f64, usize)> = sums
        .iter()
        .zip(1u32..)
        .filter(|((_, n), _)| *n > 0)
        .map(|((sum, n), month)| (month, sum / *n as f64, *n))
        .collect();
    if averages.is_empty() {
        return Vec::new();
    }
    let grand = averages.iter().map(|(_, avg, _)| avg).sum::<f64>() / averages.len() as f64;

    averages
        .into_iter()
        .map(|(month, avg, samples)| {
            let index = if grand == 0.0 { 0.0 } else { round2(avg / grand * 100.0) };
            MonthIndex {
                month,
                name: MONTH_NAMES[(month - 1) as usize],
                average_revenue: round2(avg),
                samples,
                index,
                classification: Season::classify(index),
            }
        })
        .collect()
}

pub async fn seasonality(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let today = business_today(ctx.clock());
    let current = month_key(today.year(), today.month());

    let complete: Vec<MonthlyPoint> = paid_monthly_series(ctx, filter)
        .await?
        .into_iter()
        .filter(|p| p.month != current)
        .collect();
    if complete.len() < MIN_COMPLETE_MONTHS {
        return Err(AnalyticsError::InsufficientData {
            required: MIN_COMPLETE_MONTHS,
            available: complete.len(),
        });
    }

    let months = seasonal_indices(&complete);
    let strongest = months
        .iter()
        .max_by(|a, b| a.index.total_cmp(&b.index))
        .map(|m| m.name);
    let weakest = months
        .iter()
        .min_by(|a, b| a.index.total_cmp(&b.index))
        .map(|m| m.name);

    let data = json!({
        "months_analyzed": complete.len(),
        "first_month": complete.first().map(|p| p.month.clone()),
        "last_month": complete.last().map(|p| p.month.clone()),
        "strongest_month": strongest,
        "weakest_month": weakest,
        "months": months,
    });
    Ok(Computed::new(paid_history_filter(filter), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryParams, TenantId};
    use crate::registry::test_support::*;
    use crate::registry::{FunctionName, Registry};
    use crate::store::MemoryOrderStore;
    use std::sync::Arc;

    fn point(year: i32, month: u32, revenue: f64) -> MonthlyPoint {
        MonthlyPoint {
            month: month_key(year, month),
            year,
            month_number: month,
            orders: 1,
            revenue,
        }
    }

    #[test]
    fn test_indices_average_across_years() {
        let points = vec![
            point(2024, 11, 100.0),
            point(2024, 12, 300.0),
            point(2025, 1, 100.0),
            point(2025, 11, 100.0),
            point(2025, 12, 100.0),
        ];
        // Nov 100, Dec 200, Jan 100 -> grand 133.33
        let indices = seasonal_indices(&points);
        assert_eq!(indices.len(), 3);
        assert_eq!(indices[0].name, "January");
        assert_eq!(indices[0].index, 75.0);
        assert_eq!(indices[0].classification, Season::Weak);
        assert_eq!(indices[2].name, "December");
        assert_eq!(indices[2].samples, 2);
        assert_eq!(indices[2].index, 150.0);
        assert_eq!(indices[2].classification, Season::Strong);
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(Season::classify(120.0), Season::Strong);
        assert_eq!(Season::classify(119.99), Season::Normal);
        assert_eq!(Season::classify(90.0), Season::Normal);
        assert_eq!(Season::classify(89.99), Season::Weak);
    }

    #[tokio::test]
    async fn test_in_progress_month_excluded() {
        let store = MemoryOrderStore::new(vec![
            order("Amazon", "paid", 100.0, local(2025, 12, 10, 10)),
            order("Amazon", "paid", 100.0, local(2026, 1, 10, 10)),
            order("Amazon", "paid", 100.0, local(2026, 2, 10, 10)),
            order("Amazon", "paid", 5000.0, local(2026, 3, 10, 10)),
        ]);
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();

        let result = registry
            .call(FunctionName::Seasonality, &QueryParams::default(), &tenant)
            .await
            .unwrap();
        assert_eq!(result.data["months_analyzed"], 3);
        assert_eq!(result.data["last_month"], "2026-02");
        let months = result.data["months"].as_array().unwrap();
        assert!(months.iter().all(|m| m["index"] == 100.0));
        assert!(months.iter().all(|m| m["classification"] == "normal"));
    }

    #[tokio::test]
    async fn test_seasonality_needs_complete_months() {
        let store = MemoryOrderStore::new(vec![order(
            "Amazon",
            "paid",
            100.0,
            local(2026, 2, 10, 10),
        )]);
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();

        let err = registry
            .call(FunctionName::Seasonality, &QueryParams::default(), &tenant)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }
}
