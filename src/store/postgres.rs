//! PostgreSQL order store using sqlx.
//!
//! Aggregates are built with [`QueryBuilder`] so that every user-supplied
//! value is a bound parameter. Calendar keys are computed in SQL from the
//! business-local wall clock.

use super::{AggregateRow, Dimension, OrderFilter, OrderStore};
use crate::error::StoreError;
use crate::filters::BUSINESS_UTC_OFFSET_WEST;
use crate::models::TenantId;
use crate::sanitizer::{SanitizedQuery, FACT_TABLE};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, instrument};

/// Statement timeout applied to ad-hoc reads.
const READ_QUERY_TIMEOUT: &str = "5s";

/// Order store backed by a PostgreSQL `orders` table.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Business-local timestamp expression.
fn local_timestamp() -> String {
    format!(
        "((order_date AT TIME ZONE 'UTC') - INTERVAL '{} seconds')",
        BUSINESS_UTC_OFFSET_WEST
    )
}

fn dimension_sql(dimension: Dimension) -> String {
    let ts = local_timestamp();
    match dimension {
        Dimension::Status => "COALESCE(status, '')".to_string(),
        Dimension::Marketplace => "COALESCE(marketplace, '')".to_string(),
        Dimension::Day => format!("TO_CHAR({}, 'YYYY-MM-DD')", ts),
        Dimension::Week => format!("TO_CHAR(DATE_TRUNC('week', {}), 'YYYY-MM-DD')", ts),
        Dimension::Month => format!("TO_CHAR({}, 'YYYY-MM')", ts),
        Dimension::Year => format!("TO_CHAR({}, 'YYYY')", ts),
        Dimension::Hour => format!("TO_CHAR({}, 'HH24')", ts),
        Dimension::Weekday => format!("EXTRACT(DOW FROM {})::INT::TEXT", ts),
    }
}

/// Escape `LIKE` metacharacters in user input.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Build the grouped aggregate for `tenant`.
fn build_aggregate_query<'a>(
    tenant: &TenantId,
    filter: &OrderFilter,
    group_by: &[Dimension],
) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");

    for (i, dimension) in group_by.iter().enumerate() {
        qb.push(dimension_sql(*dimension));
        qb.push(format!(" AS k{}, ", i));
    }

    qb.push(
        "COUNT(*)::BIGINT AS orders, \
         COALESCE(SUM(total_amount), 0)::FLOAT8 AS revenue, \
         COALESCE(MIN(total_amount), 0)::FLOAT8 AS min_amount, \
         COALESCE(MAX(total_amount), 0)::FLOAT8 AS max_amount, \
         COALESCE(SUM(total_amount * total_amount), 0)::FLOAT8 AS sum_squares ",
    );
    qb.push(format!("FROM {} WHERE tenant_id = ", FACT_TABLE));
    qb.push_bind(tenant.as_str().to_string());

    if let Some(ref status) = filter.status {
        qb.push(" AND LOWER(TRIM(status)) = LOWER(TRIM(");
        qb.push_bind(status.clone());
        qb.push("))");
    }
    if let Some(ref marketplace) = filter.marketplace {
        qb.push(" AND marketplace ILIKE ");
        qb.push_bind(format!("%{}%", escape_like(marketplace)));
    }
    if let Some(from) = filter.from {
        qb.push(" AND order_date >= ");
        qb.push_bind(from);
    }
    if let Some(until) = filter.until {
        qb.push(" AND order_date < ");
        qb.push_bind(until);
    }

    let positions = (1..=group_by.len())
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    if !group_by.is_empty() {
        qb.push(format!(" GROUP BY {}", positions));
    }
    qb.push(" HAVING COUNT(*) > 0");
    if !group_by.is_empty() {
        qb.push(format!(" ORDER BY {}", positions));
    }

    qb
}

/// Wrap a sanitized query so it only sees the tenant's rows and returns
/// its result set as one JSON array. `$1` is the tenant id.
fn tenant_scoped_read(query: &SanitizedQuery) -> String {
    format!(
        "WITH {table} AS (SELECT * FROM public.{table} WHERE tenant_id = $1) \
         SELECT COALESCE(JSON_AGG(q), '[]'::JSON) FROM ({query}) AS q",
        table = FACT_TABLE,
        query = query.as_str()
    )
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, filter), fields(tenant = %tenant))]
    async fn aggregate(
        &self,
        tenant: &TenantId,
        filter: &OrderFilter,
        group_by: &[Dimension],
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let mut qb = build_aggregate_query(tenant, filter, group_by);
        debug!("aggregate sql: {}", qb.sql());

        let rows = qb.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let keys = (0..group_by.len())
                    .map(|i| row.try_get::<String, _>(i))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());
                Ok(AggregateRow {
                    keys,
                    orders: row.try_get("orders").map_err(decode)?,
                    revenue: row.try_get("revenue").map_err(decode)?,
                    min_amount: row.try_get("min_amount").map_err(decode)?,
                    max_amount: row.try_get("max_amount").map_err(decode)?,
                    sum_squares: row.try_get("sum_squares").map_err(decode)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, query), fields(tenant = %tenant))]
    async fn run_read_query(
        &self,
        tenant: &TenantId,
        query: &SanitizedQuery,
    ) -> Result<Vec<Value>, StoreError> {
        let sql = tenant_scoped_read(query);
        debug!("read query sql: {}", sql);

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}'",
            READ_QUERY_TIMEOUT
        ))
        .execute(&mut *tx)
        .await?;

        let result: Value = sqlx::query_scalar(&sql)
            .bind(tenant.as_str())
            .fetch_one(&mut *tx)
            .await?;
        tx.rollback().await?;

        match result {
            Value::Array(rows) => Ok(rows),
            other => Err(StoreError::Decode(format!(
                "expected a JSON array, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitizer::sanitize_query;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_aggregate_sql_binds_every_filter() {
        let tenant = TenantId::new("acme").unwrap();
        let filter = OrderFilter {
            status: Some("paid".to_string()),
            marketplace: Some("amazon".to_string()),
            from: Some(Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2026, 2, 1, 3, 0, 0).unwrap()),
        };
        let qb = build_aggregate_query(&tenant, &filter, &[Dimension::Month, Dimension::Status]);
        let sql = qb.sql();

        assert!(sql.contains("WHERE tenant_id = $1"));
        assert!(sql.contains("LOWER(TRIM($2))"));
        assert!(sql.contains("marketplace ILIKE $3"));
        assert!(sql.contains("order_date >= $4"));
        assert!(sql.contains("order_date < $5"));
        assert!(sql.contains("GROUP BY 1, 2"));
        assert!(sql.contains("ORDER BY 1, 2"));
        assert!(!sql.contains("acme"));
        assert!(!sql.contains("amazon"));
    }

    #[test]
    fn test_ungrouped_sql_has_no_group_by() {
        let tenant = TenantId::new("acme").unwrap();
        let qb = build_aggregate_query(&tenant, &OrderFilter::default(), &[]);
        assert!(!qb.sql().contains("GROUP BY"));
        assert!(qb.sql().contains("HAVING COUNT(*) > 0"));
    }

    #[test]
    fn test_calendar_dimensions_shift_to_business_time() {
        assert!(dimension_sql(Dimension::Month).contains("INTERVAL '10800 seconds'"));
        assert!(dimension_sql(Dimension::Weekday).starts_with("EXTRACT(DOW"));
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(escape_like("100%_off"), "100\\%\\_off");
    }

    #[test]
    fn test_read_query_is_wrapped_in_tenant_cte() {
        let outcome = sanitize_query("SELECT status, COUNT(*) FROM orders GROUP BY status");
        let query = outcome.into_query().unwrap();
        let sql = tenant_scoped_read(&query);
        assert!(sql.starts_with("WITH orders AS (SELECT * FROM public.orders WHERE tenant_id = $1)"));
        assert!(sql.contains("FROM (SELECT status, COUNT(*) FROM orders GROUP BY status LIMIT 1000) AS q"));
    }
}
