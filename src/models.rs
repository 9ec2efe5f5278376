//! Data models for the analytics core.
//!
//! This module contains the order record, request parameters and the
//! result envelope shared by the registry, the orchestrator and the
//! fallback formatter.

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The only status counted as realized revenue.
pub const PAID_STATUS: &str = "paid";

/// Statuses counted as cancellations.
pub const CANCELLED_STATUSES: &[&str] = &["cancelled", "canceled"];

/// Returns true when the status represents realized revenue.
pub fn is_paid(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case(PAID_STATUS)
}

/// Returns true when the status represents a cancellation.
pub fn is_cancelled(status: &str) -> bool {
    let status = status.trim();
    CANCELLED_STATUSES
        .iter()
        .any(|c| status.eq_ignore_ascii_case(c))
}

/// A single order row of the fact table. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub tenant_id: String,
    pub marketplace: String,
    pub status: String,
    pub total_amount: f64,
    pub order_date: DateTime<Utc>,
}

/// Identifier of an isolated customer. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(AnalyticsError::validation(
                "tenant_id",
                "tenant id must not be empty",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = AnalyticsError;

    fn try_from(value: String) -> Result<Self> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ranking direction for `top_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    #[default]
    Best,
    Worst,
}

impl fmt::Display for RankOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankOrder::Best => write!(f, "best"),
            RankOrder::Worst => write!(f, "worst"),
        }
    }
}

/// Ranking metric for `top_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    #[default]
    Revenue,
    Orders,
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankMetric::Revenue => write!(f, "revenue"),
            RankMetric::Orders => write!(f, "orders"),
        }
    }
}

/// Parameters accepted by every registry function.
///
/// Exactly one date mode may be set: `all_time`, `start_date` + `end_date`,
/// `period_days` or `current_month`. None means all time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryParams {
    /// Exact status (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Marketplace substring (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_time: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_month: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<RankOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<RankMetric>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
}

impl QueryParams {
    /// Parse parameters from a tool-call argument object.
    ///
    /// `null` and empty-string values are treated as absent, which is how
    /// models tend to express "not set".
    pub fn from_json(args: &Value) -> Result<Self> {
        let cleaned = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_null() && v.as_str() != Some(""))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => {
                return Err(AnalyticsError::validation(
                    "params",
                    format!("expected an object, got {}", other),
                ))
            }
        };

        serde_json::from_value(cleaned)
            .map_err(|e| AnalyticsError::validation("params", e.to_string()))
    }

    /// Status filter, if a non-blank one was given.
    pub fn status_filter(&self) -> Option<&str> {
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Marketplace filter, if a non-blank one was given.
    pub fn marketplace_filter(&self) -> Option<&str> {
        self.marketplace
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Echo of the filters a function actually applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedFilters {
    pub status: Option<String>,
    pub marketplace: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub all_time: bool,
}

/// Output of a registry function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Registry name of the function that produced this result.
    pub function: String,
    pub filters: AppliedFilters,
    /// Function-specific payload.
    pub data: Value,
}

/// Round to 2 decimals (currency and percentages).
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// `part / whole × 100`, rounded; `0` when `whole` is zero.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round2(part / whole * 100.0)
    }
}

/// `a / b`, rounded; `0` when `b` is zero.
pub fn ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        round2(a / b)
    }
}

/// Relative change in percent, or `None` when the baseline is zero.
///
/// A zero baseline has no meaningful change; reporting `0` would read as
/// "no change".
pub fn change_percentage(current: f64, baseline: f64) -> Option<f64> {
    if baseline == 0.0 {
        None
    } else {
        Some(round2((current - baseline) / baseline * 100.0))
    }
}
