//! Tool definitions for the conversational agent.
//!
//! Every registry function is exposed as a tool, plus the sanitized
//! ad-hoc query. Execution never fails: errors become a structured
//! `{error, kind}` object handed back to the model.

use crate::agent::provider::{FunctionCall, ToolDeclaration};
use crate::error::AnalyticsError;
use crate::models::{QueryResult, TenantId};
use crate::registry::{FunctionName, Registry, CUSTOM_QUERY_FUNCTION};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub function: String,
    pub output: std::result::Result<QueryResult, ToolError>,
}

/// Error surfaced to the model and the fallback formatter.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub kind: &'static str,
    pub message: String,
    pub details: Value,
}

impl From<&AnalyticsError> for ToolError {
    fn from(e: &AnalyticsError) -> Self {
        ToolError {
            kind: e.kind(),
            message: e.caller_message(),
            details: e.to_json(),
        }
    }
}

impl ToolResult {
    pub fn success(output: QueryResult) -> Self {
        Self {
            function: output.function.clone(),
            output: Ok(output),
        }
    }

    pub fn error(function: impl Into<String>, error: &AnalyticsError) -> Self {
        Self {
            function: function.into(),
            output: Err(ToolError::from(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_ok()
    }

    /// Payload of the `functionResponse` part.
    pub fn to_response(&self) -> Value {
        match &self.output {
            Ok(result) => serde_json::to_value(result).unwrap_or(Value::Null),
            Err(e) => e.details.clone(),
        }
    }
}

/// Runs tool calls against the registry for one tenant at a time.
pub struct ToolExecutor {
    registry: Arc<Registry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Execute a tool call and return the result.
    pub async fn execute(&self, call: &FunctionCall, tenant: &TenantId) -> ToolResult {
        debug!("Executing tool: {} with args: {}", call.name, call.args);

        let outcome = if call.name == CUSTOM_QUERY_FUNCTION {
            match call.args.get("query").and_then(|v| v.as_str()) {
                Some(query) => self.registry.run_custom_query(query, tenant).await,
                None => Err(AnalyticsError::validation(
                    "query",
                    "missing required parameter: query",
                )),
            }
        } else {
            self.registry.call_by_name(&call.name, &call.args, tenant).await
        };

        match outcome {
            Ok(result) => {
                info!("Tool {} executed", call.name);
                ToolResult::success(result)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                ToolResult::error(call.name.clone(), &e)
            }
        }
    }
}

fn filter_properties() -> Map<String, Value> {
    let properties = json!({
        "status": {
            "type": "string",
            "description": "Exact order status, e.g. paid, pending, cancelled"
        },
        "marketplace": {
            "type": "string",
            "description": "Marketplace name or part of it (case-insensitive)"
        },
        "all_time": {
            "type": "boolean",
            "description": "Use the whole history"
        },
        "start_date": {
            "type": "string",
            "description": "First day, YYYY-MM-DD (requires end_date)"
        },
        "end_date": {
            "type": "string",
            "description": "Last day, YYYY-MM-DD, inclusive (requires start_date)"
        },
        "period_days": {
            "type": "integer",
            "description": "Last N days including today"
        },
        "current_month": {
            "type": "boolean",
            "description": "From the first day of the current month until today"
        }
    });
    match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn parameters_for(function: FunctionName) -> Value {
    let mut properties = filter_properties();
    match function {
        FunctionName::TopDays => {
            properties.insert(
                "limit".to_string(),
                json!({"type": "integer", "description": "How many days to return (1-100, default 5)"}),
            );
            properties.insert(
                "order".to_string(),
                json!({"type": "string", "enum": ["best", "worst"], "description": "Ranking direction"}),
            );
            properties.insert(
                "metric".to_string(),
                json!({"type": "string", "enum": ["revenue", "orders"], "description": "Ranking metric"}),
            );
        }
        FunctionName::YearOverYear => {
            properties.insert(
                "year".to_string(),
                json!({"type": "integer", "description": "Year of the month to compare (default current)"}),
            );
            properties.insert(
                "month".to_string(),
                json!({"type": "integer", "description": "Month 1-12 (default current)"}),
            );
        }
        _ => {}
    }
    json!({
        "type": "object",
        "properties": properties,
    })
}

/// Declarations of every tool the model may call.
pub fn tool_declarations() -> Vec<ToolDeclaration> {
    let mut tools: Vec<ToolDeclaration> = FunctionName::ALL
        .iter()
        .map(|f| ToolDeclaration {
            name: f.as_str().to_string(),
            description: f.description().to_string(),
            parameters: parameters_for(*f),
        })
        .collect();

    tools.push(ToolDeclaration {
        name: CUSTOM_QUERY_FUNCTION.to_string(),
        description: "Run a read-only SELECT over the `orders` table (columns: marketplace, status, total_amount, order_date) when no other function fits. Dates are stored in UTC. Only aggregate, rounding, text and date functions may be called. At most 1000 rows are returned.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SELECT statement over the orders table"
                }
            },
            "required": ["query"]
        }),
    });

    tools
}
