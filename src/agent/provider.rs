//! Language model provider abstraction.
//!
//! The orchestrator talks to [`LlmProvider`] only. [`GeminiProvider`] is
//! the production back-end, speaking the Gemini `generateContent` API over
//! reqwest.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Author of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_wire(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse { name: String, response: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Content {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Content {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    /// Empty means the model must answer in text.
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    /// Concatenated text parts, if any.
    pub text: Option<String>,
    /// First function call, if any.
    pub function_call: Option<FunctionCall>,
    pub usage: Usage,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

/// Settings of the Gemini back-end.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_output_tokens: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash-lite".to_string(),
            api_key: String::new(),
            temperature: 0.1,
            timeout_seconds: 30,
            max_output_tokens: 2048,
        }
    }
}

// Wire types of the generateContent API.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<ToolDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

fn to_wire(content: &Content) -> GeminiContent {
    GeminiContent {
        role: Some(content.role.as_wire().to_string()),
        parts: content
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => GeminiPart::Text { text: text.clone() },
                Part::FunctionCall(call) => GeminiPart::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: call.name.clone(),
                        args: call.args.clone(),
                    },
                },
                Part::FunctionResponse { name, response } => GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: name.clone(),
                        response: response.clone(),
                    },
                },
            })
            .collect(),
    }
}

fn from_wire(response: GeminiResponse) -> Result<GenerateResponse, ProviderError> {
    let usage = response
        .usage_metadata
        .map(|u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("no candidates returned".to_string()))?;

    let mut texts = Vec::new();
    let mut function_call = None;
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            GeminiPart::Text { text } => texts.push(text),
            GeminiPart::FunctionCall { function_call: call } if function_call.is_none() => {
                function_call = Some(FunctionCall {
                    name: call.name,
                    args: call.args,
                });
            }
            _ => {}
        }
    }

    let text = texts.concat();
    Ok(GenerateResponse {
        text: (!text.trim().is_empty()).then_some(text),
        function_call,
        usage,
    })
}

/// Gemini `generateContent` client.
pub struct GeminiProvider {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("missing API key".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("http client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let body = GeminiRequest {
            contents: request.contents.iter().map(to_wire).collect(),
            system_instruction: request.system_instruction.map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text { text }],
            }),
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
            tools: (!request.tools.is_empty()).then(|| {
                vec![GeminiTool {
                    function_declarations: request.tools,
                }]
            }),
        };

        debug!(
            "Sending generateContent request with {} contents",
            body.contents.len()
        );

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout_seconds)
                } else if e.is_connect() {
                    ProviderError::Connect(self.config.api_url.clone())
                } else {
                    ProviderError::InvalidResponse(format!("failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::Api { status, message });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        from_wire(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let content = Content {
            role: Role::Model,
            parts: vec![Part::FunctionCall(FunctionCall {
                name: "total_sales".to_string(),
                args: json!({"period_days": 7}),
            })],
        };
        let wire = serde_json::to_value(to_wire(&content)).unwrap();
        assert_eq!(wire["role"], "model");
        assert_eq!(wire["parts"][0]["functionCall"]["name"], "total_sales");

        let request = GeminiRequest {
            contents: vec![],
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text {
                    text: "sys".to_string(),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 100,
            },
            tools: Some(vec![GeminiTool {
                function_declarations: vec![ToolDeclaration {
                    name: "count_orders".to_string(),
                    description: "d".to_string(),
                    parameters: json!({"type": "object"}),
                }],
            }]),
        };
        let wire = serde_json::to_value(request).unwrap();
        assert_eq!(wire["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(wire["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(
            wire["tools"][0]["functionDeclarations"][0]["name"],
            "count_orders"
        );
    }

    #[test]
    fn test_response_with_function_call() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "monthly_sales", "args": {"all_time": true}}}]
                }
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 8, "totalTokenCount": 128}
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = from_wire(parsed).unwrap();

        assert_eq!(response.text, None);
        let call = response.function_call.unwrap();
        assert_eq!(call.name, "monthly_sales");
        assert_eq!(call.args["all_time"], true);
        assert_eq!(response.usage.input_tokens, 120);
        assert_eq!(response.usage.output_tokens, 8);
    }

    #[test]
    fn test_response_text_parts_concatenated() {
        let raw = json!({
            "candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "there"}]}}]
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = from_wire(parsed).unwrap();
        assert_eq!(response.text.as_deref(), Some("Hello there"));
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn test_response_without_candidates() {
        let parsed: GeminiResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(matches!(
            from_wire(parsed),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_provider_requires_api_key() {
        assert!(matches!(
            GeminiProvider::new(GeminiConfig::default()),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
