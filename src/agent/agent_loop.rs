//! Conversational turn orchestration.
//!
//! One turn is at most two model calls:
//! - Dispatch: the model sees the tools and either answers in text or
//!   picks one function.
//! - Compose: the model sees the function result (no tools) and writes the
//!   answer. If that call fails, the deterministic fallback formatter
//!   renders the result instead.

use crate::agent::provider::{
    Content, GenerateRequest, GenerateResponse, LlmProvider, Part, Role, Usage,
};
use crate::agent::tools::{tool_declarations, ToolExecutor, ToolResult};
use crate::agent::vocabulary::{Vocabulary, VocabularyCache, VOCABULARY_TTL_SECONDS};
use crate::filters::business_today;
use crate::models::TenantId;
use crate::registry::{FunctionName, Registry, CUSTOM_QUERY_FUNCTION};
use crate::report::render_tool_result;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// USD per million input tokens.
pub const INPUT_PRICE_PER_MILLION: f64 = 0.10;
/// USD per million output tokens.
pub const OUTPUT_PRICE_PER_MILLION: f64 = 0.40;

const RETRY_LATER_MESSAGE: &str =
    "Sorry, I can't answer right now. Please try again in a few moments.";
const EMPTY_ANSWER_MESSAGE: &str =
    "Sorry, I didn't understand the question. Could you rephrase it?";

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Prior turns kept in the dispatch prompt.
    pub max_history_turns: usize,
    pub vocabulary_ttl_seconds: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_history_turns: 10,
            vocabulary_ttl_seconds: VOCABULARY_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A prior message of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Incoming turn: `{message, history, tenant_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub tenant_id: TenantId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(rename = "estimatedCostUSD")]
    pub estimated_cost_usd: f64,
}

impl TokenUsage {
    fn add(&mut self, usage: Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_tokens = self.input_tokens + self.output_tokens;
        self.estimated_cost_usd = estimate_cost(self.input_tokens, self.output_tokens);
    }
}

/// Cost in USD at the fixed per-million prices, rounded to 6 decimals.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    let cost = input_tokens as f64 / 1_000_000.0 * INPUT_PRICE_PER_MILLION
        + output_tokens as f64 / 1_000_000.0 * OUTPUT_PRICE_PER_MILLION;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_follow_ups: Option<Vec<String>>,
}

/// The conversational front of the analytics core.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    executor: ToolExecutor,
    vocabulary: VocabularyCache,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<Registry>,
        config: OrchestratorConfig,
    ) -> Self {
        let vocabulary = VocabularyCache::new(
            registry.store().clone(),
            registry.clock().clone(),
            Duration::seconds(config.vocabulary_ttl_seconds),
        );
        Self {
            provider,
            executor: ToolExecutor::new(registry),
            vocabulary,
            config,
        }
    }

    /// Answer one user message. Never fails: provider and function errors
    /// are turned into a user-facing text.
    pub async fn handle_turn(&self, request: ChatRequest) -> ChatResponse {
        let tenant = &request.tenant_id;
        info!("Handling turn for tenant {}", tenant);

        let today = business_today(self.executor.registry().clock().as_ref());
        let vocabulary = self.vocabulary.get(tenant).await;
        let system = system_instruction(today, &vocabulary);
        let user_turn = Content::user_text(request.message.clone());

        let mut contents = self.bounded_history(&request.history);
        contents.push(user_turn.clone());

        let mut usage = TokenUsage::default();

        // Dispatch
        let dispatch = match self
            .provider
            .generate(GenerateRequest {
                system_instruction: Some(system.clone()),
                contents,
                tools: tool_declarations(),
            })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Dispatch call failed: {}", e);
                return ChatResponse {
                    text: RETRY_LATER_MESSAGE.to_string(),
                    token_usage: usage,
                    suggested_follow_ups: None,
                };
            }
        };
        usage.add(dispatch.usage);

        let GenerateResponse {
            text,
            function_call,
            ..
        } = dispatch;
        let Some(call) = function_call else {
            debug!("Model answered without calling a function");
            return ChatResponse {
                text: text.unwrap_or_else(|| EMPTY_ANSWER_MESSAGE.to_string()),
                token_usage: usage,
                suggested_follow_ups: None,
            };
        };

        // Execute
        let result = self.executor.execute(&call, tenant).await;

        // Compose
        let compose = self
            .provider
            .generate(GenerateRequest {
                system_instruction: Some(system),
                contents: vec![
                    user_turn,
                    Content {
                        role: Role::Model,
                        parts: vec![Part::FunctionCall(call.clone())],
                    },
                    Content {
                        role: Role::User,
                        parts: vec![Part::FunctionResponse {
                            name: call.name.clone(),
                            response: result.to_response(),
                        }],
                    },
                ],
                tools: Vec::new(),
            })
            .await;

        let text = match compose {
            Ok(response) => {
                usage.add(response.usage);
                match response.text {
                    Some(text) if !text.trim().is_empty() => text,
                    _ => {
                        warn!("Compose call returned no text, using fallback formatter");
                        render_tool_result(&result)
                    }
                }
            }
            Err(e) => {
                warn!("Compose call failed ({}), using fallback formatter", e);
                render_tool_result(&result)
            }
        };

        info!(
            "Turn done: {} input / {} output tokens",
            usage.input_tokens, usage.output_tokens
        );

        ChatResponse {
            text,
            token_usage: usage,
            suggested_follow_ups: follow_ups(&result),
        }
    }

    /// Most recent turns only, oldest first.
    fn bounded_history(&self, history: &[ChatTurn]) -> Vec<Content> {
        let skip = history.len().saturating_sub(self.config.max_history_turns);
        history[skip..]
            .iter()
            .filter(|turn| !turn.content.trim().is_empty())
            .map(|turn| match turn.role {
                ChatRole::User => Content::user_text(turn.content.clone()),
                ChatRole::Assistant => Content::model_text(turn.content.clone()),
            })
            .collect()
    }
}

fn follow_ups(result: &ToolResult) -> Option<Vec<String>> {
    if !result.is_success() {
        return None;
    }
    let suggestions: &[&str] = if result.function == CUSTOM_QUERY_FUNCTION {
        &["Show the monthly sales", "Compare the marketplaces"]
    } else {
        match FunctionName::from_str(&result.function).ok()? {
            FunctionName::CountOrders | FunctionName::TotalSales => &[
                "Break it down by marketplace",
                "How does it compare with the previous period?",
            ],
            FunctionName::AverageTicket => &[
                "What is the average ticket per marketplace?",
                "How has the average ticket changed by month?",
            ],
            FunctionName::SalesSummary => &[
                "What is the cancellation rate per marketplace?",
                "Show the monthly sales",
            ],
            FunctionName::OrdersByStatus => &[
                "What is the cancellation rate?",
                "Show the orders by marketplace",
            ],
            FunctionName::OrdersByMarketplace | FunctionName::CompareMarketplaces => &[
                "Which marketplace has the highest cancellation rate?",
                "Show the monthly sales of the top marketplace",
            ],
            FunctionName::MonthlySales => &[
                "What is the forecast for next month?",
                "Is there any seasonality?",
            ],
            FunctionName::WeeklySales | FunctionName::DailySales => &[
                "What were the best days?",
                "Which weekday sells the most?",
            ],
            FunctionName::SalesByHour | FunctionName::SalesByWeekday => &[
                "What were the best days?",
                "Show the daily sales for the last 30 days",
            ],
            FunctionName::TopDays => &[
                "And the worst days?",
                "Which hour of the day sells the most?",
            ],
            FunctionName::CancellationRate => &[
                "Compare the marketplaces",
                "How does it compare with last month?",
            ],
            FunctionName::ComparePeriods | FunctionName::YearOverYear => &[
                "Show the monthly sales",
                "Run a health check",
            ],
            FunctionName::ForecastRevenue => &[
                "Is there any seasonality?",
                "Run a health check",
            ],
            FunctionName::Seasonality => &[
                "What is the forecast for next month?",
                "Compare this month with the same month last year",
            ],
            FunctionName::HealthCheck => &[
                "What is the forecast for next month?",
                "What is the cancellation rate per marketplace?",
            ],
        }
    };
    Some(suggestions.iter().map(|s| s.to_string()).collect())
}

/// System instruction of both calls.
pub fn system_instruction(today: NaiveDate, vocabulary: &Vocabulary) -> String {
    let list = |values: &[String]| {
        if values.is_empty() {
            "(unknown)".to_string()
        } else {
            values.join(", ")
        }
    };

    format!(
        r#"You are a sales analytics assistant for an online seller. You answer questions about the seller's orders.

Today is {today} (business time, UTC-3).

Known order statuses: {statuses}
Known marketplaces: {marketplaces}

## Rules

- Use the functions to get numbers. Call at most one function per question.
- Never state a number that is not present in a function result.
- Use exactly one date mode per call: all_time, start_date + end_date, period_days or current_month.
- Revenue means paid orders unless the user asks otherwise.
- If a function returns an error, explain it briefly and suggest how to rephrase.
- Answer in the language of the question, concisely, using Markdown.
"#,
        today = today.format("%Y-%m-%d"),
        statuses = list(&vocabulary.statuses),
        marketplaces = list(&vocabulary.marketplaces),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::{FunctionCall, MockLlmProvider};
    use crate::error::ProviderError;
    use crate::registry::test_support::*;
    use crate::store::{MemoryOrderStore, MockOrderStore};
    use serde_json::json;

    fn registry_with_orders() -> Arc<Registry> {
        let store = MemoryOrderStore::new(vec![
            order("Amazon", "paid", 120.0, local(2026, 3, 3, 10)),
            order("Shopee", "paid", 80.0, local(2026, 3, 4, 10)),
        ]);
        Arc::new(Registry::new(Arc::new(store), fixed_clock()))
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            history: Vec::new(),
            tenant_id: TenantId::new(TENANT).unwrap(),
        }
    }

    fn usage(input: u64, output: u64) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    fn calls_total_sales() -> GenerateResponse {
        GenerateResponse {
            text: None,
            function_call: Some(FunctionCall {
                name: "total_sales".to_string(),
                args: json!({"current_month": true}),
            }),
            usage: usage(1000, 20),
        }
    }

    #[tokio::test]
    async fn test_text_only_reply_executes_nothing() {
        let mut provider = MockLlmProvider::new();
        provider.expect_generate().times(1).returning(|_| {
            Ok(GenerateResponse {
                text: Some("Hello! Ask me about your sales.".to_string()),
                function_call: None,
                usage: usage(500, 10),
            })
        });

        // the store only serves the vocabulary lookup
        let mut store = MockOrderStore::new();
        store.expect_aggregate().times(2).returning(|_, _, _| Ok(vec![]));
        store.expect_run_read_query().never();
        let registry = Arc::new(Registry::new(Arc::new(store), fixed_clock()));

        let orchestrator =
            Orchestrator::new(Arc::new(provider), registry, OrchestratorConfig::default());
        let response = orchestrator.handle_turn(request("hi")).await;

        assert_eq!(response.text, "Hello! Ask me about your sales.");
        assert_eq!(response.token_usage.input_tokens, 500);
        assert!(response.suggested_follow_ups.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_returns_retry_message() {
        let mut provider = MockLlmProvider::new();
        provider
            .expect_generate()
            .times(1)
            .returning(|_| Err(ProviderError::Timeout(30)));

        let orchestrator = Orchestrator::new(
            Arc::new(provider),
            registry_with_orders(),
            OrchestratorConfig::default(),
        );
        let response = orchestrator.handle_turn(request("total sales?")).await;

        assert_eq!(response.text, RETRY_LATER_MESSAGE);
        assert_eq!(response.token_usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_full_turn_sums_tokens() {
        let mut provider = MockLlmProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.tools.len() == 20 && req.contents.len() == 1)
            .returning(|_| Ok(calls_total_sales()));
        provider
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.tools.is_empty()
                    && matches!(
                        &req.contents[2].parts[0],
                        Part::FunctionResponse { name, response }
                            if name == "total_sales" && response["data"]["total_revenue"] == 200.0
                    )
            })
            .returning(|_| {
                Ok(GenerateResponse {
                    text: Some("You sold **200.00** this month.".to_string()),
                    function_call: None,
                    usage: usage(1500, 40),
                })
            });

        let orchestrator = Orchestrator::new(
            Arc::new(provider),
            registry_with_orders(),
            OrchestratorConfig::default(),
        );
        let response = orchestrator.handle_turn(request("How much did I sell?")).await;

        assert_eq!(response.text, "You sold **200.00** this month.");
        assert_eq!(response.token_usage.input_tokens, 2500);
        assert_eq!(response.token_usage.output_tokens, 60);
        assert_eq!(response.token_usage.total_tokens, 2560);
        assert_eq!(response.token_usage.estimated_cost_usd, 0.000274);
        assert_eq!(response.suggested_follow_ups.map(|f| f.len()), Some(2));
    }

    #[tokio::test]
    async fn test_compose_failure_uses_fallback() {
        let mut provider = MockLlmProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(calls_total_sales()));
        provider
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                })
            });

        let orchestrator = Orchestrator::new(
            Arc::new(provider),
            registry_with_orders(),
            OrchestratorConfig::default(),
        );
        let response = orchestrator.handle_turn(request("How much did I sell?")).await;

        assert!(response.text.contains("200.00"));
        assert!(response.text.contains("```chart"));
        assert_eq!(response.token_usage.input_tokens, 1000);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let mut provider = MockLlmProvider::new();
        provider
            .expect_generate()
            .times(1)
            .withf(|req| {
                req.contents.len() == 3
                    && req.contents[0].parts[0] == Part::Text("question 3".to_string())
            })
            .returning(|_| {
                Ok(GenerateResponse {
                    text: Some("ok".to_string()),
                    ..Default::default()
                })
            });

        let orchestrator = Orchestrator::new(
            Arc::new(provider),
            registry_with_orders(),
            OrchestratorConfig {
                max_history_turns: 2,
                ..Default::default()
            },
        );
        let mut req = request("latest");
        req.history = (0..5)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 {
                    ChatRole::User
                } else {
                    ChatRole::Assistant
                },
                content: format!("question {}", i),
            })
            .collect();

        let response = orchestrator.handle_turn(req).await;
        assert_eq!(response.text, "ok");
    }

    #[test]
    fn test_response_wire_format() {
        let response = ChatResponse {
            text: "hi".to_string(),
            token_usage: TokenUsage {
                input_tokens: 1,
                output_tokens: 2,
                total_tokens: 3,
                estimated_cost_usd: 0.0,
            },
            suggested_follow_ups: None,
        };
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["tokenUsage"]["inputTokens"], 1);
        assert!(wire["tokenUsage"].get("estimatedCostUSD").is_some());
        assert!(wire.get("suggestedFollowUps").is_none());
    }

    #[test]
    fn test_request_wire_format() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "message": "hi",
            "history": [{"role": "assistant", "content": "hello"}],
            "tenant_id": "acme"
        }))
        .unwrap();
        assert_eq!(request.tenant_id.as_str(), "acme");
        assert_eq!(request.history[0].role, ChatRole::Assistant);

        let without_history: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "tenant_id": "acme"}"#).unwrap();
        assert!(without_history.history.is_empty());
        assert!(
            serde_json::from_str::<ChatRequest>(r#"{"message": "hi", "tenantId": "acme"}"#)
                .is_err()
        );
    }

    #[test]
    fn test_system_instruction_lists_vocabulary() {
        let vocabulary = Vocabulary {
            statuses: vec!["paid".to_string()],
            marketplaces: vec!["Amazon".to_string(), "Shopee".to_string()],
        };
        let text = system_instruction(
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
            &vocabulary,
        );
        assert!(text.contains("Today is 2026-03-15"));
        assert!(text.contains("Amazon, Shopee"));
        assert!(text.contains("Never state a number"));
    }
}
