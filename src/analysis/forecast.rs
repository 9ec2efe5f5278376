//! Next-month revenue forecast.
//!
//! A blend of a 3-month moving average and an ordinary least squares
//! projection over the monthly paid-revenue series. The in-progress month
//! is extrapolated to a full month before it enters the series.

use super::paid_monthly_series;
use crate::error::{AnalyticsError, Result};
use crate::filters::{business_today, days_in_month, month_key, next_month, NormalizedFilter};
use crate::models::round2;
use crate::registry::{Computed, QueryContext};
use chrono::Datelike;
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Minimum number of monthly points.
pub const MIN_POINTS: usize = 3;

/// Weight of the moving average in the blend; the rest goes to the trend.
const MOVING_AVERAGE_WEIGHT: f64 = 0.7;

/// Slope band, as a fraction of the series mean, considered flat.
const STABLE_BAND: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Growth,
    Decline,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Growth => write!(f, "growth"),
            Trend::Decline => write!(f, "decline"),
            Trend::Stable => write!(f, "stable"),
        }
    }
}

/// Fitted model over a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastModel {
    pub moving_average: f64,
    pub slope: f64,
    pub intercept: f64,
    pub linear_projection: f64,
    pub forecast: f64,
    pub trend: Trend,
}

/// Fit the blend over `values`, oldest first.
pub fn forecast_from_series(values: &[f64]) -> Result<ForecastModel> {
    let n = values.len();
    if n < MIN_POINTS {
        return Err(AnalyticsError::InsufficientData {
            required: MIN_POINTS,
            available: n,
        });
    }

    let moving_average = values[n - MIN_POINTS..].iter().sum::<f64>() / MIN_POINTS as f64;

    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
    let intercept = mean_y - slope * mean_x;
    let linear_projection = intercept + slope * nf;

    let forecast = (MOVING_AVERAGE_WEIGHT * moving_average
        + (1.0 - MOVING_AVERAGE_WEIGHT) * linear_projection)
        .max(0.0);

    let band = STABLE_BAND * mean_y.abs();
    let trend = if slope > band {
        Trend::Growth
    } else if slope < -band {
        Trend::Decline
    } else {
        Trend::Stable
    };

    Ok(ForecastModel {
        moving_average: round2(moving_average),
        slope: round2(slope),
        intercept: round2(intercept),
        linear_projection: round2(linear_projection),
        forecast: round2(forecast),
        trend,
    })
}

/// Full-month estimate from a partial month.
pub fn extrapolate_month(revenue_so_far: f64, days_elapsed: u32, days_in_month: u32) -> f64 {
    if days_elapsed == 0 {
        return revenue_so_far;
    }
    revenue_so_far / f64::from(days_elapsed) * f64::from(days_in_month)
}

#[derive(Debug, Serialize)]
struct HistoryPoint {
    month: String,
    orders: i64,
    revenue: f64,
    extrapolated: bool,
}

pub async fn forecast_revenue(ctx: &QueryContext<'_>, filter: &NormalizedFilter) -> Result<Computed> {
    let series = paid_monthly_series(ctx, filter).await?;
    let today = business_today(ctx.clock());
    let current_key = month_key(today.year(), today.month());
    let month_days = days_in_month(today.year(), today.month());

    let mut current_month = None;
    let history: Vec<HistoryPoint> = series
        .iter()
        .map(|p| {
            let in_progress = p.month == current_key;
            let revenue = if in_progress {
                let projected = extrapolate_month(p.revenue, today.day(), month_days);
                current_month = Some(json!({
                    "month": p.month,
                    "revenue_so_far": round2(p.revenue),
                    "days_elapsed": today.day(),
                    "days_in_month": month_days,
                    "projected_revenue": round2(projected),
                }));
                projected
            } else {
                p.revenue
            };
            HistoryPoint {
                month: p.month.clone(),
                orders: p.orders,
                revenue: round2(revenue),
                extrapolated: in_progress,
            }
        })
        .collect();

    let values: Vec<f64> = history.iter().map(|h| h.revenue).collect();
    let model = forecast_from_series(&values)?;
    let (next_year, next) = next_month(today.year(), today.month());

    let data = json!({
        "forecast_month": month_key(next_year, next),
        "forecast": model.forecast,
        "moving_average": model.moving_average,
        "linear_projection": model.linear_projection,
        "slope": model.slope,
        "trend": model.trend,
        "current_month": current_month,
        "history": history,
    });
    Ok(Computed::new(super::paid_history_filter(filter), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryParams, TenantId};
    use crate::registry::test_support::*;
    use crate::registry::{FunctionName, Registry};
    use crate::store::MemoryOrderStore;
    use std::sync::Arc;

    #[test]
    fn test_flat_series_is_stable() {
        let model = forecast_from_series(&[100.0, 100.0, 100.0]).unwrap();
        assert_eq!(model.moving_average, 100.0);
        assert_eq!(model.slope, 0.0);
        assert_eq!(model.forecast, 100.0);
        assert_eq!(model.trend, Trend::Stable);
    }

    #[test]
    fn test_rising_series_blends_trend() {
        // ma = 200, slope = 100, projection at x=3 is 400
        let model = forecast_from_series(&[100.0, 200.0, 300.0]).unwrap();
        assert_eq!(model.slope, 100.0);
        assert_eq!(model.linear_projection, 400.0);
        assert_eq!(model.forecast, 260.0);
        assert_eq!(model.trend, Trend::Growth);
    }

    #[test]
    fn test_collapsing_series_floors_at_zero() {
        let model = forecast_from_series(&[1000.0, 100.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(model.trend, Trend::Decline);
        assert!(model.forecast >= 0.0);
    }

    #[test]
    fn test_too_few_points() {
        let err = forecast_from_series(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InsufficientData {
                required: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn test_extrapolate_month() {
        assert_eq!(extrapolate_month(150.0, 15, 30), 300.0);
        assert_eq!(extrapolate_month(10.0, 0, 30), 10.0);
    }

    #[tokio::test]
    async fn test_forecast_revenue_extrapolates_current_month() {
        let store = MemoryOrderStore::new(vec![
            order("Amazon", "paid", 310.0, local(2026, 1, 10, 10)),
            order("Amazon", "cancelled", 999.0, local(2026, 1, 11, 10)),
            order("Amazon", "paid", 280.0, local(2026, 2, 10, 10)),
            // 15 of 31 days elapsed
            order("Amazon", "paid", 150.0, local(2026, 3, 2, 10)),
        ]);
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();

        let result = registry
            .call(FunctionName::ForecastRevenue, &QueryParams::default(), &tenant)
            .await
            .unwrap();

        assert_eq!(result.data["forecast_month"], "2026-04");
        assert_eq!(result.data["current_month"]["revenue_so_far"], 150.0);
        assert_eq!(result.data["current_month"]["projected_revenue"], 310.0);
        let history = result.data["history"].as_array().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0]["revenue"], 310.0);
        assert_eq!(history[2]["extrapolated"], true);
        assert_eq!(result.filters.status.as_deref(), Some("paid"));
    }

    #[tokio::test]
    async fn test_forecast_revenue_insufficient_history() {
        let store = MemoryOrderStore::new(vec![order(
            "Amazon",
            "paid",
            10.0,
            local(2026, 3, 2, 10),
        )]);
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();

        let err = registry
            .call(FunctionName::ForecastRevenue, &QueryParams::default(), &tenant)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }
}
