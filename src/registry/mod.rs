//! Query function registry.
//!
//! A closed set of named aggregate functions over the order fact table.
//! Names map to handlers through an explicit `match`; anything outside the
//! set is rejected. Results are memoized per `(tenant, function, params)`
//! for a short TTL.

pub mod comparison;
pub mod sales;
pub mod timeseries;

use crate::analysis::{forecast, health, seasonality};
use crate::cache::{cache_key, TtlCache, RESULT_TTL_SECONDS};
use crate::clock::Clock;
use crate::error::{AnalyticsError, Result};
use crate::filters::{normalize, NormalizedFilter};
use crate::models::{AppliedFilters, QueryParams, QueryResult, TenantId};
use crate::sanitizer::sanitize_query;
use crate::store::{AggregateRow, Dimension, OrderStore};
use chrono::Duration;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Tool name of the sanitized ad-hoc query escape valve.
pub const CUSTOM_QUERY_FUNCTION: &str = "execute_custom_query";

/// Every registry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionName {
    CountOrders,
    TotalSales,
    AverageTicket,
    SalesSummary,
    OrdersByStatus,
    OrdersByMarketplace,
    MonthlySales,
    WeeklySales,
    DailySales,
    SalesByHour,
    SalesByWeekday,
    TopDays,
    CancellationRate,
    CompareMarketplaces,
    ComparePeriods,
    YearOverYear,
    ForecastRevenue,
    Seasonality,
    HealthCheck,
}

impl FunctionName {
    pub const ALL: [FunctionName; 19] = [
        FunctionName::CountOrders,
        FunctionName::TotalSales,
        FunctionName::AverageTicket,
        FunctionName::SalesSummary,
        FunctionName::OrdersByStatus,
        FunctionName::OrdersByMarketplace,
        FunctionName::MonthlySales,
        FunctionName::WeeklySales,
        FunctionName::DailySales,
        FunctionName::SalesByHour,
        FunctionName::SalesByWeekday,
        FunctionName::TopDays,
        FunctionName::CancellationRate,
        FunctionName::CompareMarketplaces,
        FunctionName::ComparePeriods,
        FunctionName::YearOverYear,
        FunctionName::ForecastRevenue,
        FunctionName::Seasonality,
        FunctionName::HealthCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::CountOrders => "count_orders",
            FunctionName::TotalSales => "total_sales",
            FunctionName::AverageTicket => "average_ticket",
            FunctionName::SalesSummary => "sales_summary",
            FunctionName::OrdersByStatus => "orders_by_status",
            FunctionName::OrdersByMarketplace => "orders_by_marketplace",
            FunctionName::MonthlySales => "monthly_sales",
            FunctionName::WeeklySales => "weekly_sales",
            FunctionName::DailySales => "daily_sales",
            FunctionName::SalesByHour => "sales_by_hour",
            FunctionName::SalesByWeekday => "sales_by_weekday",
            FunctionName::TopDays => "top_days",
            FunctionName::CancellationRate => "cancellation_rate",
            FunctionName::CompareMarketplaces => "compare_marketplaces",
            FunctionName::ComparePeriods => "compare_periods",
            FunctionName::YearOverYear => "year_over_year",
            FunctionName::ForecastRevenue => "forecast_revenue",
            FunctionName::Seasonality => "seasonality",
            FunctionName::HealthCheck => "health_check",
        }
    }

    /// Description shown to the model in the tool declaration.
    pub fn description(&self) -> &'static str {
        match self {
            FunctionName::CountOrders => {
                "Count orders, with a breakdown by status and by marketplace when those filters are not set."
            }
            FunctionName::TotalSales => {
                "Total order amount (all statuses unless filtered) with per-status and per-marketplace breakdowns."
            }
            FunctionName::AverageTicket => {
                "Average order value with standard deviation, minimum and maximum."
            }
            FunctionName::SalesSummary => {
                "Overview KPIs: orders, revenue, paid revenue, average paid ticket, cancellation and conversion rates."
            }
            FunctionName::OrdersByStatus => "Distribution of orders and amount by status.",
            FunctionName::OrdersByMarketplace => {
                "Distribution of orders and amount by marketplace, with a nested per-status breakdown."
            }
            FunctionName::MonthlySales => {
                "Monthly time series of orders and amount with month-over-month growth."
            }
            FunctionName::WeeklySales => {
                "Weekly (Monday-based) time series of orders and amount with week-over-week growth."
            }
            FunctionName::DailySales => "Daily time series of orders and amount.",
            FunctionName::SalesByHour => "Orders and amount by hour of day (business time).",
            FunctionName::SalesByWeekday => "Orders and amount by day of week (business time).",
            FunctionName::TopDays => {
                "Rank days by revenue or number of orders. Use order=best or order=worst and limit."
            }
            FunctionName::CancellationRate => {
                "Cancellation rate overall and per marketplace."
            }
            FunctionName::CompareMarketplaces => {
                "Marketplace comparison matrix: paid revenue share, average ticket, cancellation and conversion rates."
            }
            FunctionName::ComparePeriods => {
                "Compare a date range with the immediately preceding period of the same length."
            }
            FunctionName::YearOverYear => {
                "Compare a calendar month (year, month; default current) with the same month of the previous year."
            }
            FunctionName::ForecastRevenue => {
                "Forecast next month's paid revenue from monthly history (moving average blended with a linear trend)."
            }
            FunctionName::Seasonality => {
                "Seasonal index of each calendar month of paid revenue (strong, normal, weak)."
            }
            FunctionName::HealthCheck => {
                "Run health-check rules on the current month and return alerts (revenue, cancellations, ticket, trends)."
            }
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FunctionName {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        FunctionName::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| AnalyticsError::UnknownFunction(s.to_string()))
    }
}

/// Output of a function before it is wrapped in a [`QueryResult`].
#[derive(Debug, Clone)]
pub struct Computed {
    /// Filters the function actually applied.
    pub filter: NormalizedFilter,
    pub data: Value,
}

impl Computed {
    pub fn new(filter: NormalizedFilter, data: Value) -> Self {
        Self { filter, data }
    }
}

/// Everything a function needs, with the tenant already bound.
pub struct QueryContext<'a> {
    store: &'a dyn OrderStore,
    tenant: &'a TenantId,
    clock: &'a dyn Clock,
}

impl<'a> QueryContext<'a> {
    pub fn new(store: &'a dyn OrderStore, tenant: &'a TenantId, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            tenant,
            clock,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock
    }

    pub fn tenant(&self) -> &TenantId {
        self.tenant
    }

    /// Run a tenant-scoped aggregate. Store failures are logged in full
    /// here and surface as a generic data store error.
    pub async fn aggregate(
        &self,
        filter: &NormalizedFilter,
        group_by: &[Dimension],
    ) -> Result<Vec<AggregateRow>> {
        self.store
            .aggregate(self.tenant, &filter.to_order_filter(), group_by)
            .await
            .map_err(|e| {
                error!("aggregate failed for tenant {}: {}", self.tenant, e);
                AnalyticsError::from(e)
            })
    }
}

/// Sum of a set of aggregate rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub orders: i64,
    pub revenue: f64,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub sum_squares: f64,
}

impl Totals {
    pub fn of<'r>(rows: impl IntoIterator<Item = &'r AggregateRow>) -> Self {
        let mut totals = Totals::default();
        for row in rows {
            if row.orders == 0 {
                continue;
            }
            totals.orders += row.orders;
            totals.revenue += row.revenue;
            totals.sum_squares += row.sum_squares;
            totals.min_amount = Some(totals.min_amount.map_or(row.min_amount, |m| m.min(row.min_amount)));
            totals.max_amount = Some(totals.max_amount.map_or(row.max_amount, |m| m.max(row.max_amount)));
        }
        totals
    }

    pub fn average(&self) -> f64 {
        crate::models::ratio(self.revenue, self.orders as f64)
    }
}

/// Growth in percent against a baseline bucket; `None` when the baseline
/// had no orders or no revenue.
pub(crate) fn growth(current: f64, baseline_orders: i64, baseline: f64) -> Option<f64> {
    if baseline_orders == 0 {
        return None;
    }
    crate::models::change_percentage(current, baseline)
}

/// Registry of aggregate functions with a result cache.
pub struct Registry {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    cache: TtlCache<QueryResult>,
}

impl Registry {
    pub fn new(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_cache_ttl(store, clock, Duration::seconds(RESULT_TTL_SECONDS))
    }

    pub fn with_cache_ttl(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let cache = TtlCache::new(ttl, clock.clone());
        Self {
            store,
            clock,
            cache,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `function` for `tenant`, serving a cached result when fresh.
    pub async fn call(
        &self,
        function: FunctionName,
        params: &QueryParams,
        tenant: &TenantId,
    ) -> Result<QueryResult> {
        let key = cache_key(tenant, function.as_str(), params);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let filter = normalize(params, self.clock.as_ref())?;
        let ctx = QueryContext::new(self.store.as_ref(), tenant, self.clock.as_ref());

        info!("running {} for tenant {}", function, tenant);
        let computed = self.execute(function, params, &filter, &ctx).await?;

        let result = QueryResult {
            function: function.as_str().to_string(),
            filters: computed.filter.applied(),
            data: computed.data,
        };
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    /// Resolve a function by name and parse its JSON arguments.
    pub async fn call_by_name(&self, name: &str, args: &Value, tenant: &TenantId) -> Result<QueryResult> {
        let function = FunctionName::from_str(name)?;
        let params = QueryParams::from_json(args)?;
        self.call(function, &params, tenant).await
    }

    /// The escape valve: sanitize, then execute against the tenant's rows.
    pub async fn run_custom_query(&self, query: &str, tenant: &TenantId) -> Result<QueryResult> {
        let sanitized = sanitize_query(query).into_query()?;
        debug!("running custom query for tenant {}: {}", tenant, sanitized.as_str());

        let rows = self
            .store
            .run_read_query(tenant, &sanitized)
            .await
            .map_err(|e| {
                error!("custom query failed for tenant {}: {}", tenant, e);
                AnalyticsError::from(e)
            })?;

        Ok(QueryResult {
            function: CUSTOM_QUERY_FUNCTION.to_string(),
            filters: AppliedFilters {
                all_time: true,
                ..Default::default()
            },
            data: json!({
                "query": sanitized.as_str(),
                "row_count": rows.len(),
                "rows": rows,
            }),
        })
    }

    async fn execute(
        &self,
        function: FunctionName,
        params: &QueryParams,
        filter: &NormalizedFilter,
        ctx: &QueryContext<'_>,
    ) -> Result<Computed> {
        match function {
            FunctionName::CountOrders => sales::count_orders(ctx, filter).await,
            FunctionName::TotalSales => sales::total_sales(ctx, filter).await,
            FunctionName::AverageTicket => sales::average_ticket(ctx, filter).await,
            FunctionName::SalesSummary => sales::sales_summary(ctx, filter).await,
            FunctionName::OrdersByStatus => sales::orders_by_status(ctx, filter).await,
            FunctionName::OrdersByMarketplace => sales::orders_by_marketplace(ctx, filter).await,
            FunctionName::MonthlySales => timeseries::monthly_sales(ctx, filter).await,
            FunctionName::WeeklySales => timeseries::weekly_sales(ctx, filter).await,
            FunctionName::DailySales => timeseries::daily_sales(ctx, filter).await,
            FunctionName::SalesByHour => timeseries::sales_by_hour(ctx, filter).await,
            FunctionName::SalesByWeekday => timeseries::sales_by_weekday(ctx, filter).await,
            FunctionName::TopDays => timeseries::top_days(ctx, filter, params).await,
            FunctionName::CancellationRate => comparison::cancellation_rate(ctx, filter).await,
            FunctionName::CompareMarketplaces => {
                comparison::compare_marketplaces(ctx, filter).await
            }
            FunctionName::ComparePeriods => comparison::compare_periods(ctx, filter).await,
            FunctionName::YearOverYear => comparison::year_over_year(ctx, filter, params).await,
            FunctionName::ForecastRevenue => forecast::forecast_revenue(ctx, filter).await,
            FunctionName::Seasonality => seasonality::seasonality(ctx, filter).await,
            FunctionName::HealthCheck => health::health_check(ctx, filter).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::clock::FixedClock;
    use crate::models::OrderRecord;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    pub const TENANT: &str = "tenant-a";

    /// 2026-03-15 12:00 in business time.
    pub fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 15, 15, 0, 0).unwrap(),
        ))
    }

    /// Instant of business-local `y-m-d h:00`.
    pub fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        crate::filters::business_tz()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    pub fn order(
        marketplace: &str,
        status: &str,
        amount: f64,
        at: DateTime<Utc>,
    ) -> OrderRecord {
        OrderRecord {
            tenant_id: TENANT.to_string(),
            marketplace: marketplace.to_string(),
            status: status.to_string(),
            total_amount: amount,
            order_date: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::store::{MemoryOrderStore, MockOrderStore};

    #[test]
    fn test_function_names_round_trip() {
        for f in FunctionName::ALL {
            assert_eq!(FunctionName::from_str(f.as_str()).unwrap(), f);
            assert!(!f.description().is_empty());
        }
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = FunctionName::from_str("drop_everything").unwrap_err();
        assert_eq!(err.kind(), "unknown_function");
    }

    #[tokio::test]
    async fn test_identical_calls_hit_store_once() {
        let mut store = MockOrderStore::new();
        store.expect_aggregate().times(1).returning(|_, _, _| {
            Ok(vec![AggregateRow {
                keys: vec!["paid".to_string()],
                orders: 3,
                revenue: 300.0,
                min_amount: 50.0,
                max_amount: 150.0,
                sum_squares: 35000.0,
            }])
        });

        let clock = fixed_clock();
        let registry = Registry::new(Arc::new(store), clock.clone());
        let tenant = TenantId::new(TENANT).unwrap();
        let params = QueryParams {
            marketplace: Some("amazon".to_string()),
            ..Default::default()
        };

        let first = registry
            .call(FunctionName::CountOrders, &params, &tenant)
            .await
            .unwrap();
        clock.advance(Duration::seconds(30));
        let second = registry
            .call(FunctionName::CountOrders, &params, &tenant)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.data["total_orders"], 3);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let mut store = MockOrderStore::new();
        store
            .expect_aggregate()
            .times(2)
            .returning(|_, _, _| Ok(vec![]));

        let clock = fixed_clock();
        let registry = Registry::new(Arc::new(store), clock.clone());
        let tenant = TenantId::new(TENANT).unwrap();
        let params = QueryParams {
            status: Some("paid".to_string()),
            marketplace: Some("amazon".to_string()),
            ..Default::default()
        };

        registry
            .call(FunctionName::CountOrders, &params, &tenant)
            .await
            .unwrap();
        clock.advance(Duration::seconds(61));
        registry
            .call(FunctionName::CountOrders, &params, &tenant)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mut store = MockOrderStore::new();
        store
            .expect_aggregate()
            .times(2)
            .returning(|_, _, _| Err(crate::error::StoreError::Database("boom".to_string())));

        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();
        let params = QueryParams {
            status: Some("paid".to_string()),
            marketplace: Some("x".to_string()),
            ..Default::default()
        };

        for _ in 0..2 {
            let err = registry
                .call(FunctionName::AverageTicket, &params, &tenant)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "data_store_error");
        }
    }

    #[tokio::test]
    async fn test_store_receives_bound_tenant() {
        let mut store = MockOrderStore::new();
        store
            .expect_aggregate()
            .withf(|tenant, _, _| tenant.as_str() == "tenant-b")
            .returning(|_, _, _| Ok(vec![]));

        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new("tenant-b").unwrap();
        registry
            .call(FunctionName::SalesSummary, &QueryParams::default(), &tenant)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validation_error_before_store() {
        let store = MockOrderStore::new();
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();
        let params = QueryParams {
            end_date: Some("2026-02-xx".to_string()),
            start_date: Some("2026-02-01".to_string()),
            ..Default::default()
        };
        let err = registry
            .call(FunctionName::TotalSales, &params, &tenant)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_call_by_name() {
        let store = MemoryOrderStore::new(vec![order("amazon", "paid", 10.0, local(2026, 3, 1, 10))]);
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();

        let result = registry
            .call_by_name("count_orders", &json!({"current_month": true}), &tenant)
            .await
            .unwrap();
        assert_eq!(result.function, "count_orders");
        assert_eq!(result.data["total_orders"], 1);
        assert_eq!(result.filters.start_date.as_deref(), Some("2026-03-01"));

        let err = registry
            .call_by_name("nope", &json!({}), &tenant)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_function");
    }

    #[tokio::test]
    async fn test_custom_query_rejected_before_store() {
        let store = MockOrderStore::new();
        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();
        let err = registry
            .run_custom_query("SELECT * FROM users", &tenant)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sanitization_rejected");
    }

    #[test]
    fn test_bypass_shapes_never_reach_store() {
        // no expectations: any store call panics
        let registry = Registry::new(Arc::new(MockOrderStore::new()), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();

        for query in [
            "SELECT * FROM (orders JOIN public.orders p ON true)",
            "SELECT * FROM orders WHERE tenant_id IN (TABLE pg_user)",
            "SELECT pg_catalog.current_database() FROM orders",
            "SELECT * FROM orders WHERE status = E'paid'",
            "SELECT ts_stat('SELECT to_tsvector(tenant_id) FROM public.orders')",
            "SELECT ts_rewrite('a'::tsquery, 'SELECT t, s FROM public.orders') FROM orders",
            r#"SELECT U&"query!005fto!005fxml" UESCAPE '!'('SELECT * FROM public.orders', true, false, '')"#,
            "SELECT unknown_reader('orders') FROM orders",
        ] {
            let result = tokio_test::block_on(registry.run_custom_query(query, &tenant));
            assert!(
                matches!(&result, Err(e) if e.kind() == "sanitization_rejected"),
                "{query}: {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_custom_query_runs_sanitized_text() {
        let mut store = MockOrderStore::new();
        store
            .expect_run_read_query()
            .withf(|tenant, query| {
                tenant.as_str() == TENANT && query.as_str() == "SELECT status FROM orders LIMIT 1000"
            })
            .times(1)
            .returning(|_, _| Ok(vec![json!({"status": "paid"})]));

        let registry = Registry::new(Arc::new(store), fixed_clock());
        let tenant = TenantId::new(TENANT).unwrap();
        let result = registry
            .run_custom_query("SELECT status FROM orders", &tenant)
            .await
            .unwrap();
        assert_eq!(result.function, CUSTOM_QUERY_FUNCTION);
        assert_eq!(result.data["row_count"], 1);
    }
}
