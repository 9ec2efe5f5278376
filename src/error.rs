//! Error types for the analytics core.
//!
//! Store and provider failures have their own enums so that back-ends can
//! report detail; both convert into [`AnalyticsError`], which is what the
//! registry and orchestrator hand to callers.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors raised by an [`OrderStore`](crate::store::OrderStore) back-end.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database rejected or failed the query.
    #[error("database error: {0}")]
    Database(String),

    /// The back-end cannot serve this kind of request.
    #[error("operation not supported by {0} store")]
    Unsupported(String),

    /// A returned row could not be decoded.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Errors raised by an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot connect to provider at {0}")]
    Connect(String),

    #[error("provider api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Caller-facing error taxonomy of the analytics core.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Malformed parameters or dates.
    #[error("invalid value for `{field}`: {message}")]
    Validation { field: String, message: String },

    /// An ad-hoc query was blocked by the sanitizer. It was never executed.
    #[error("query rejected: {0}")]
    SanitizationRejected(String),

    /// Query execution failed. The detail is logged, not returned.
    #[error("data store error: {0}")]
    DataStore(#[from] StoreError),

    /// Not enough history for a statistical derivation.
    #[error("insufficient data: {required} monthly data points required, {available} available")]
    InsufficientData { required: usize, available: usize },

    /// The LLM provider could not be reached or answered garbage.
    #[error("language model unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    /// A function name outside the registry.
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

impl AnalyticsError {
    /// Shorthand for a field-level validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AnalyticsError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::Validation { .. } => "validation_error",
            AnalyticsError::SanitizationRejected(_) => "sanitization_rejected",
            AnalyticsError::DataStore(_) => "data_store_error",
            AnalyticsError::InsufficientData { .. } => "insufficient_data",
            AnalyticsError::ProviderUnavailable(_) => "provider_unavailable",
            AnalyticsError::UnknownFunction(_) => "unknown_function",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Store failures are reduced to a generic sentence; everything else is
    /// surfaced verbatim because there is no safe default to fall back to.
    pub fn caller_message(&self) -> String {
        match self {
            AnalyticsError::DataStore(_) => {
                "The data could not be retrieved right now. Please try again later.".to_string()
            }
            AnalyticsError::ProviderUnavailable(_) => {
                "The assistant is temporarily unavailable. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Structured error object handed to the model and the fallback formatter.
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "error": self.caller_message(),
            "kind": self.kind(),
        });
        match self {
            AnalyticsError::Validation { field, .. } => {
                value["field"] = json!(field);
            }
            AnalyticsError::InsufficientData {
                required,
                available,
            } => {
                value["required"] = json!(required);
                value["available"] = json!(available);
            }
            _ => {}
        }
        value
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_detail_is_hidden_from_caller() {
        let err = AnalyticsError::from(StoreError::Database(
            "relation \"orders\" does not exist".to_string(),
        ));
        assert!(!err.caller_message().contains("relation"));
        assert_eq!(err.kind(), "data_store_error");
    }

    #[test]
    fn test_validation_json_carries_field() {
        let err = AnalyticsError::validation("end_date", "expected YYYY-MM-DD");
        let json = err.to_json();
        assert_eq!(json["kind"], "validation_error");
        assert_eq!(json["field"], "end_date");
        assert!(json["error"].as_str().unwrap().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_insufficient_data_json() {
        let err = AnalyticsError::InsufficientData {
            required: 3,
            available: 1,
        };
        let json = err.to_json();
        assert_eq!(json["required"], 3);
        assert_eq!(json["available"], 1);
    }
}
