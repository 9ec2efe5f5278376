//! Deterministic Markdown rendering of function results.
//!
//! Used when the compose call fails, and by the CLI's Markdown output.
//! Renderers only print fields that are literally present in `data`; a
//! missing field is skipped, never guessed.

use crate::agent::tools::{ToolError, ToolResult};
use crate::analysis::health::Severity;
use crate::models::{AppliedFilters, QueryResult};
use crate::registry::{FunctionName, CUSTOM_QUERY_FUNCTION};
use crate::report::chart::{ChartSpec, ChartType};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Rows of an ad-hoc query shown in the table.
const MAX_TABLE_ROWS: usize = 20;

/// Render a tool outcome: the result, or an apology with the error.
pub fn render_tool_result(result: &ToolResult) -> String {
    match &result.output {
        Ok(output) => render_query_result(output),
        Err(e) => render_error(e),
    }
}

pub fn render_error(error: &ToolError) -> String {
    format!(
        "Sorry, I couldn't get that information. {}\n",
        error.message
    )
}

/// Render a successful function result as Markdown.
pub fn render_query_result(result: &QueryResult) -> String {
    let data = &result.data;
    let mut out = String::new();

    if result.function == CUSTOM_QUERY_FUNCTION {
        render_custom_query(data, &mut out);
        return out;
    }

    let Ok(function) = FunctionName::from_str(&result.function) else {
        out.push_str(&format!("```json\n{}\n```\n", pretty(data)));
        return out;
    };

    out.push_str(&format!("### {}\n\n", heading(function)));
    out.push_str(&filters_line(&result.filters));

    match function {
        FunctionName::CountOrders => render_count_orders(data, &mut out),
        FunctionName::TotalSales => render_total_sales(data, &mut out),
        FunctionName::AverageTicket => render_average_ticket(data, &mut out),
        FunctionName::SalesSummary => render_sales_summary(data, &mut out),
        FunctionName::OrdersByStatus => render_orders_by_status(data, &mut out),
        FunctionName::OrdersByMarketplace => render_orders_by_marketplace(data, &mut out),
        FunctionName::MonthlySales => render_monthly_sales(data, &mut out),
        FunctionName::WeeklySales => render_weekly_sales(data, &mut out),
        FunctionName::DailySales => render_daily_sales(data, &mut out),
        FunctionName::SalesByHour => render_sales_by_hour(data, &mut out),
        FunctionName::SalesByWeekday => render_sales_by_weekday(data, &mut out),
        FunctionName::TopDays => render_top_days(data, &mut out),
        FunctionName::CancellationRate => render_cancellation_rate(data, &mut out),
        FunctionName::CompareMarketplaces => render_compare_marketplaces(data, &mut out),
        FunctionName::ComparePeriods | FunctionName::YearOverYear => {
            render_period_comparison(data, &mut out)
        }
        FunctionName::ForecastRevenue => render_forecast(data, &mut out),
        FunctionName::Seasonality => render_seasonality(data, &mut out),
        FunctionName::HealthCheck => render_health_check(data, &mut out),
    }

    out
}

fn heading(function: FunctionName) -> &'static str {
    match function {
        FunctionName::CountOrders => "Orders",
        FunctionName::TotalSales => "Sales",
        FunctionName::AverageTicket => "Average ticket",
        FunctionName::SalesSummary => "Sales summary",
        FunctionName::OrdersByStatus => "Orders by status",
        FunctionName::OrdersByMarketplace => "Orders by marketplace",
        FunctionName::MonthlySales => "Monthly sales",
        FunctionName::WeeklySales => "Weekly sales",
        FunctionName::DailySales => "Daily sales",
        FunctionName::SalesByHour => "Sales by hour",
        FunctionName::SalesByWeekday => "Sales by weekday",
        FunctionName::TopDays => "Top days",
        FunctionName::CancellationRate => "Cancellation rate",
        FunctionName::CompareMarketplaces => "Marketplace comparison",
        FunctionName::ComparePeriods => "Period comparison",
        FunctionName::YearOverYear => "Year over year",
        FunctionName::ForecastRevenue => "Revenue forecast",
        FunctionName::Seasonality => "Seasonality",
        FunctionName::HealthCheck => "Health check",
    }
}

fn filters_line(filters: &AppliedFilters) -> String {
    let mut parts = Vec::new();
    match (&filters.start_date, &filters.end_date) {
        (Some(start), Some(end)) if !filters.all_time => {
            parts.push(format!("{} to {}", start, end))
        }
        _ => parts.push("all time".to_string()),
    }
    if let Some(ref marketplace) = filters.marketplace {
        parts.push(format!("marketplace: {}", marketplace));
    }
    if let Some(ref status) = filters.status {
        parts.push(format!("status: {}", status));
    }
    format!("*{}*\n\n", parts.join(" | "))
}

fn num(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64)
}

fn int(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(Value::as_i64)
}

fn text<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn items<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn object<'a>(v: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    v.get(key).and_then(Value::as_object)
}

fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

fn money(value: f64) -> String {
    format!("{:.2}", value)
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value)
}

fn change(value: Option<f64>) -> String {
    match value {
        Some(v) if v > 0.0 => format!("+{:.2}%", v),
        Some(v) => format!("{:.2}%", v),
        None => "n/a".to_string(),
    }
}

fn cell_money(v: &Value, key: &str) -> String {
    num(v, key).map(money).unwrap_or_default()
}

fn cell_pct(v: &Value, key: &str) -> String {
    num(v, key).map(pct).unwrap_or_default()
}

fn cell_int(v: &Value, key: &str) -> String {
    int(v, key).map(|n| n.to_string()).unwrap_or_default()
}

fn cell_text(v: &Value, key: &str) -> String {
    text(v, key).unwrap_or_default().to_string()
}

fn bullet(out: &mut String, label: &str, value: Option<String>) {
    if let Some(value) = value {
        out.push_str(&format!("- **{}:** {}\n", label, value));
    }
}

fn table(out: &mut String, headers: &[&str], rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        return;
    }
    out.push('\n');
    out.push_str(&format!("| {} |\n", headers.join(" | ")));
    out.push_str(&format!("|{}\n", ":---|".repeat(headers.len())));
    for row in rows {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    out.push('\n');
}

fn label(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Labels and one column per key, over the items that carry every key.
/// An item missing a value is left out of the chart rather than drawn as 0.
fn chart_columns(
    values: &[Value],
    label_key: &str,
    keys: &[&str],
) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut chart_labels = Vec::new();
    let mut columns = vec![Vec::new(); keys.len()];
    for v in values {
        let Some(point) = keys.iter().map(|k| num(v, k)).collect::<Option<Vec<f64>>>() else {
            continue;
        };
        chart_labels.push(label(v, label_key));
        for (column, value) in columns.iter_mut().zip(point) {
            column.push(value);
        }
    }
    (chart_labels, columns)
}

fn points(values: &[Value], label_key: &str, key: &str) -> (Vec<String>, Vec<f64>) {
    let (chart_labels, mut columns) = chart_columns(values, label_key, &[key]);
    (chart_labels, columns.pop().unwrap_or_default())
}

/// One dataset of `key` against `label_key`.
fn plot(chart: ChartSpec, values: &[Value], label_key: &str, name: &str, key: &str) -> ChartSpec {
    let (chart_labels, data) = points(values, label_key, key);
    chart.labels(chart_labels).dataset(name, data)
}

fn push_chart(out: &mut String, chart: ChartSpec) {
    let block = chart.to_markdown();
    if !block.is_empty() {
        out.push('\n');
        out.push_str(&block);
    }
}

fn render_count_orders(data: &Value, out: &mut String) {
    bullet(out, "Total orders", int(data, "total_orders").map(|n| n.to_string()));

    for (key, title) in [("by_status", "By status"), ("by_marketplace", "By marketplace")] {
        if let Some(map) = object(data, key) {
            let rows = map
                .iter()
                .map(|(name, count)| vec![name.clone(), count.to_string()])
                .collect();
            table(out, &[title, "Orders"], rows);
        }
    }

    if let Some(map) = object(data, "by_status") {
        let (chart_labels, counts): (Vec<String>, Vec<f64>) = map
            .iter()
            .filter_map(|(name, v)| v.as_f64().map(|n| (name.clone(), n)))
            .unzip();
        push_chart(
            out,
            ChartSpec::new(ChartType::Doughnut, "Orders by status")
                .labels(chart_labels)
                .dataset("Orders", counts),
        );
    }
}

fn render_total_sales(data: &Value, out: &mut String) {
    bullet(out, "Total orders", int(data, "total_orders").map(|n| n.to_string()));
    bullet(out, "Total revenue", num(data, "total_revenue").map(money));

    for (key, title) in [("by_status", "Status"), ("by_marketplace", "Marketplace")] {
        if let Some(map) = object(data, key) {
            let rows = map
                .iter()
                .map(|(name, bucket)| {
                    vec![
                        name.clone(),
                        cell_int(bucket, "orders"),
                        cell_money(bucket, "revenue"),
                    ]
                })
                .collect();
            table(out, &[title, "Orders", "Revenue"], rows);
        }
    }

    let chart_source = object(data, "by_marketplace").or_else(|| object(data, "by_status"));
    let chart = match chart_source {
        Some(map) => {
            let (chart_labels, revenue): (Vec<String>, Vec<f64>) = map
                .iter()
                .filter_map(|(name, b)| num(b, "revenue").map(|r| (name.clone(), r)))
                .unzip();
            ChartSpec::new(ChartType::Bar, "Revenue")
                .labels(chart_labels)
                .dataset("Revenue", revenue)
        }
        None => ChartSpec::new(ChartType::Bar, "Revenue")
            .labels(vec!["Total".to_string()])
            .dataset("Revenue", num(data, "total_revenue").into_iter().collect()),
    };
    push_chart(out, chart.currency());
}

fn render_average_ticket(data: &Value, out: &mut String) {
    bullet(out, "Orders", int(data, "total_orders").map(|n| n.to_string()));
    bullet(out, "Average ticket", num(data, "average_ticket").map(money));
    bullet(out, "Standard deviation", num(data, "std_deviation").map(money));
    bullet(out, "Smallest ticket", num(data, "min_ticket").map(money));
    bullet(out, "Largest ticket", num(data, "max_ticket").map(money));
}

fn render_sales_summary(data: &Value, out: &mut String) {
    bullet(out, "Orders", int(data, "total_orders").map(|n| n.to_string()));
    bullet(out, "Revenue", num(data, "total_revenue").map(money));
    bullet(out, "Paid orders", int(data, "paid_orders").map(|n| n.to_string()));
    bullet(out, "Paid revenue", num(data, "paid_revenue").map(money));
    bullet(out, "Average paid ticket", num(data, "average_paid_ticket").map(money));
    bullet(out, "Cancelled orders", int(data, "cancelled_orders").map(|n| n.to_string()));
    bullet(out, "Cancellation rate", num(data, "cancellation_rate").map(pct));
    bullet(out, "Conversion rate", num(data, "conversion_rate").map(pct));
}

fn render_orders_by_status(data: &Value, out: &mut String) {
    let statuses = items(data, "statuses");
    let rows = statuses
        .iter()
        .map(|s| {
            vec![
                cell_text(s, "status"),
                cell_int(s, "orders"),
                cell_money(s, "revenue"),
                cell_pct(s, "percentage"),
            ]
        })
        .collect();
    table(out, &["Status", "Orders", "Revenue", "Share"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Pie, "Orders by status"),
            statuses,
            "status",
            "Orders",
            "orders",
        ),
    );
}

fn render_orders_by_marketplace(data: &Value, out: &mut String) {
    let marketplaces = items(data, "marketplaces");
    let rows = marketplaces
        .iter()
        .map(|m| {
            vec![
                cell_text(m, "marketplace"),
                cell_int(m, "orders"),
                cell_money(m, "revenue"),
                cell_pct(m, "percentage"),
            ]
        })
        .collect();
    table(out, &["Marketplace", "Orders", "Revenue", "Share"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::HorizontalBar, "Revenue by marketplace"),
            marketplaces,
            "marketplace",
            "Revenue",
            "revenue",
        )
        .currency(),
    );
}

fn render_monthly_sales(data: &Value, out: &mut String) {
    bullet(out, "Total revenue", num(data, "total_revenue").map(money));
    bullet(out, "Average per month", num(data, "average_monthly_revenue").map(money));

    let months = items(data, "months");
    let rows = months
        .iter()
        .map(|m| {
            vec![
                cell_text(m, "month"),
                cell_int(m, "orders"),
                cell_money(m, "revenue"),
                cell_money(m, "average_ticket"),
                change(num(m, "growth_percentage")),
            ]
        })
        .collect();
    table(out, &["Month", "Orders", "Revenue", "Avg ticket", "Growth"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Line, "Monthly revenue"),
            months,
            "month",
            "Revenue",
            "revenue",
        )
        .currency(),
    );
}

fn render_weekly_sales(data: &Value, out: &mut String) {
    bullet(out, "Total revenue", num(data, "total_revenue").map(money));

    let weeks = items(data, "weeks");
    let rows = weeks
        .iter()
        .map(|w| {
            vec![
                cell_text(w, "week_start"),
                cell_int(w, "orders"),
                cell_money(w, "revenue"),
                change(num(w, "growth_percentage")),
            ]
        })
        .collect();
    table(out, &["Week of", "Orders", "Revenue", "Growth"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Line, "Weekly revenue"),
            weeks,
            "week_start",
            "Revenue",
            "revenue",
        )
        .currency(),
    );
}

fn render_daily_sales(data: &Value, out: &mut String) {
    bullet(out, "Total revenue", num(data, "total_revenue").map(money));
    bullet(out, "Days with sales", int(data, "active_days").map(|n| n.to_string()));
    bullet(
        out,
        "Average per active day",
        num(data, "average_revenue_per_active_day").map(money),
    );

    let days = items(data, "days");
    let rows = days
        .iter()
        .map(|d| {
            vec![
                cell_text(d, "date"),
                cell_int(d, "orders"),
                cell_money(d, "revenue"),
            ]
        })
        .collect();
    table(out, &["Date", "Orders", "Revenue"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Bar, "Daily revenue"),
            days,
            "date",
            "Revenue",
            "revenue",
        )
        .currency(),
    );
}

fn render_sales_by_hour(data: &Value, out: &mut String) {
    bullet(out, "Peak hour", int(data, "peak_hour").map(|h| format!("{:02}:00", h)));

    let hours = items(data, "hours");
    let rows = hours
        .iter()
        .filter(|h| int(h, "orders").unwrap_or(0) > 0)
        .map(|h| {
            vec![
                int(h, "hour").map(|n| format!("{:02}:00", n)).unwrap_or_default(),
                cell_int(h, "orders"),
                cell_money(h, "revenue"),
                cell_pct(h, "percentage"),
            ]
        })
        .collect();
    table(out, &["Hour", "Orders", "Revenue", "Share"], rows);
    let (chart_labels, orders): (Vec<String>, Vec<f64>) = hours
        .iter()
        .filter_map(|h| Some((format!("{:02}", int(h, "hour")?), num(h, "orders")?)))
        .unzip();
    push_chart(
        out,
        ChartSpec::new(ChartType::Bar, "Orders by hour")
            .labels(chart_labels)
            .dataset("Orders", orders),
    );
}

fn render_sales_by_weekday(data: &Value, out: &mut String) {
    bullet(out, "Best weekday", text(data, "best_weekday").map(str::to_string));

    let weekdays = items(data, "weekdays");
    let rows = weekdays
        .iter()
        .map(|d| {
            vec![
                cell_text(d, "name"),
                cell_int(d, "orders"),
                cell_money(d, "revenue"),
                cell_money(d, "average_ticket"),
            ]
        })
        .collect();
    table(out, &["Weekday", "Orders", "Revenue", "Avg ticket"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Bar, "Revenue by weekday"),
            weekdays,
            "name",
            "Revenue",
            "revenue",
        )
        .currency(),
    );
}

fn render_top_days(data: &Value, out: &mut String) {
    let metric = text(data, "metric").unwrap_or("revenue");
    let days = items(data, "days");

    for day in days {
        out.push_str(&format!(
            "{}. **{}**: {} orders, {}\n",
            cell_int(day, "rank"),
            cell_text(day, "date"),
            cell_int(day, "orders"),
            cell_money(day, "revenue"),
        ));
    }

    let chart = ChartSpec::new(ChartType::Bar, format!("Days by {}", metric));
    let chart = if metric == "orders" {
        plot(chart, days, "date", "Orders", "orders")
    } else {
        plot(chart, days, "date", "Revenue", "revenue").currency()
    };
    push_chart(out, chart);
}

fn render_cancellation_rate(data: &Value, out: &mut String) {
    bullet(out, "Orders", int(data, "total_orders").map(|n| n.to_string()));
    bullet(out, "Cancelled", int(data, "cancelled_orders").map(|n| n.to_string()));
    bullet(out, "Cancelled revenue", num(data, "cancelled_revenue").map(money));
    bullet(out, "Cancellation rate", num(data, "cancellation_rate").map(pct));

    let by_marketplace = items(data, "by_marketplace");
    let rows = by_marketplace
        .iter()
        .map(|m| {
            vec![
                cell_text(m, "marketplace"),
                cell_int(m, "orders"),
                cell_int(m, "cancelled_orders"),
                cell_pct(m, "cancellation_rate"),
            ]
        })
        .collect();
    table(out, &["Marketplace", "Orders", "Cancelled", "Rate"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::HorizontalBar, "Cancellation rate by marketplace"),
            by_marketplace,
            "marketplace",
            "Cancellation rate",
            "cancellation_rate",
        )
        .percentage(),
    );

    let (chart_labels, mut columns) =
        chart_columns(by_marketplace, "marketplace", &["orders", "cancelled_orders"]);
    let cancelled = columns.pop().unwrap_or_default();
    let kept = columns
        .pop()
        .unwrap_or_default()
        .iter()
        .zip(&cancelled)
        .map(|(orders, cancelled)| orders - cancelled)
        .collect();
    push_chart(
        out,
        ChartSpec::new(ChartType::Bar, "Orders by marketplace")
            .labels(chart_labels)
            .dataset("Not cancelled", kept)
            .dataset("Cancelled", cancelled)
            .stacked(),
    );
}

fn render_compare_marketplaces(data: &Value, out: &mut String) {
    bullet(out, "Paid revenue", num(data, "total_paid_revenue").map(money));

    let marketplaces = items(data, "marketplaces");
    let rows = marketplaces
        .iter()
        .map(|m| {
            vec![
                cell_text(m, "marketplace"),
                cell_int(m, "orders"),
                cell_money(m, "revenue"),
                cell_pct(m, "revenue_share"),
                cell_money(m, "average_ticket"),
                cell_pct(m, "cancellation_rate"),
                cell_pct(m, "conversion_rate"),
            ]
        })
        .collect();
    table(
        out,
        &[
            "Marketplace",
            "Orders",
            "Revenue",
            "Share",
            "Avg ticket",
            "Cancellation",
            "Conversion",
        ],
        rows,
    );
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Bar, "Paid revenue by marketplace"),
            marketplaces,
            "marketplace",
            "Revenue",
            "revenue",
        )
        .currency(),
    );
}

fn render_period_comparison(data: &Value, out: &mut String) {
    let (Some(current), Some(previous)) = (data.get("current"), data.get("previous")) else {
        return;
    };
    let period = |p: &Value| format!("{} to {}", cell_text(p, "start_date"), cell_text(p, "end_date"));

    let mut rows = vec![vec![
        "Period".to_string(),
        period(current),
        period(previous),
        String::new(),
    ]];
    let metrics = [
        ("Orders", "orders", "orders_change_percentage", false),
        ("Revenue", "revenue", "revenue_change_percentage", true),
        ("Paid revenue", "paid_revenue", "paid_revenue_change_percentage", true),
        ("Average ticket", "average_ticket", "average_ticket_change_percentage", true),
    ];
    for (label, key, change_key, is_money) in metrics {
        if current.get(key).is_none() {
            continue;
        }
        let cell = |p: &Value| {
            if is_money {
                cell_money(p, key)
            } else {
                cell_int(p, key)
            }
        };
        let delta = if data.get(change_key).is_some() {
            change(num(data, change_key))
        } else {
            String::new()
        };
        rows.push(vec![label.to_string(), cell(current), cell(previous), delta]);
    }
    rows.push(vec![
        "Cancellation rate".to_string(),
        cell_pct(current, "cancellation_rate"),
        cell_pct(previous, "cancellation_rate"),
        String::new(),
    ]);

    if data.get("month_to_date").and_then(Value::as_bool) == Some(true) {
        out.push_str("Month in progress: both years compared up to the same day.\n");
    }
    table(out, &["", "Current", "Previous", "Change"], rows);
    let (chart_labels, revenue): (Vec<String>, Vec<f64>) = [current, previous]
        .into_iter()
        .filter_map(|p| num(p, "revenue").map(|r| (period(p), r)))
        .unzip();
    push_chart(
        out,
        ChartSpec::new(ChartType::Bar, "Revenue")
            .labels(chart_labels)
            .dataset("Revenue", revenue)
            .currency(),
    );
}

fn render_forecast(data: &Value, out: &mut String) {
    bullet(
        out,
        "Forecast",
        num(data, "forecast").map(|f| match text(data, "forecast_month") {
            Some(month) => format!("{} for {}", money(f), month),
            None => money(f),
        }),
    );
    bullet(out, "Trend", text(data, "trend").map(str::to_string));
    bullet(out, "3-month moving average", num(data, "moving_average").map(money));
    bullet(out, "Linear projection", num(data, "linear_projection").map(money));

    if let Some(current) = data.get("current_month").filter(|v| v.is_object()) {
        bullet(
            out,
            "Current month projection",
            num(current, "projected_revenue").map(|p| {
                format!(
                    "{} ({} so far, day {} of {})",
                    money(p),
                    cell_money(current, "revenue_so_far"),
                    cell_int(current, "days_elapsed"),
                    cell_int(current, "days_in_month"),
                )
            }),
        );
    }

    let history = items(data, "history");
    let (mut chart_labels, mut values) = points(history, "month", "revenue");
    if let (Some(month), Some(forecast)) = (text(data, "forecast_month"), num(data, "forecast")) {
        chart_labels.push(month.to_string());
        values.push(forecast);
    }
    push_chart(
        out,
        ChartSpec::new(ChartType::Line, "Paid revenue and forecast")
            .labels(chart_labels)
            .dataset("Revenue", values)
            .currency(),
    );
}

fn render_seasonality(data: &Value, out: &mut String) {
    bullet(out, "Months analyzed", int(data, "months_analyzed").map(|n| n.to_string()));
    bullet(out, "Strongest month", text(data, "strongest_month").map(str::to_string));
    bullet(out, "Weakest month", text(data, "weakest_month").map(str::to_string));

    let months = items(data, "months");
    let rows = months
        .iter()
        .map(|m| {
            vec![
                cell_text(m, "name"),
                cell_money(m, "average_revenue"),
                num(m, "index").map(|i| format!("{:.2}", i)).unwrap_or_default(),
                cell_text(m, "classification"),
            ]
        })
        .collect();
    table(out, &["Month", "Avg revenue", "Index", "Season"], rows);
    push_chart(
        out,
        plot(
            ChartSpec::new(ChartType::Bar, "Seasonal index"),
            months,
            "name",
            "Index",
            "index",
        ),
    );
}

fn render_health_check(data: &Value, out: &mut String) {
    for alert in items(data, "alerts") {
        let emoji = alert
            .get("severity")
            .cloned()
            .and_then(|s| serde_json::from_value::<Severity>(s).ok())
            .map(|s| s.emoji())
            .unwrap_or("•");
        out.push_str(&format!(
            "- {} **{}**: {}\n",
            emoji,
            cell_text(alert, "title"),
            cell_text(alert, "message"),
        ));
    }

    if let Some(summary) = data.get("summary").filter(|v| v.is_object()) {
        out.push('\n');
        bullet(out, "Month", text(summary, "month").map(str::to_string));
        bullet(out, "Revenue so far", num(summary, "revenue_so_far").map(money));
        bullet(out, "Projected revenue", num(summary, "projected_revenue").map(money));
        bullet(
            out,
            "History average",
            num(summary, "history_average_revenue").map(money),
        );
        bullet(
            out,
            "Cancellation rate",
            num(summary, "current_cancellation_rate").map(pct),
        );
    }
}

fn render_custom_query(data: &Value, out: &mut String) {
    let rows = items(data, "rows");
    out.push_str(&format!(
        "Query returned {} row(s).\n",
        int(data, "row_count").unwrap_or(rows.len() as i64)
    ));

    let Some(first) = rows.first().and_then(Value::as_object) else {
        return;
    };
    let headers: Vec<&str> = first.keys().map(String::as_str).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .take(MAX_TABLE_ROWS)
        .map(|row| {
            headers
                .iter()
                .map(|h| match row.get(*h) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();
    table(out, &headers, body);
    if rows.len() > MAX_TABLE_ROWS {
        out.push_str(&format!("*Showing the first {} rows.*\n", MAX_TABLE_ROWS));
    }
}
