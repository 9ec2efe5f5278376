//! Order Insights - natural-language analytics over multi-tenant order data.
//!
//! Free-text business questions are answered by an LLM that picks one of a
//! fixed set of aggregate functions; the numbers always come from the
//! registry, never from the model.

pub mod agent;
pub mod analysis;
pub mod cache;
pub mod clock;
pub mod error;
pub mod filters;
pub mod models;
pub mod registry;
pub mod report;
pub mod sanitizer;
pub mod store;

pub use error::{AnalyticsError, Result};
pub use models::{QueryParams, QueryResult, TenantId};
pub use registry::{FunctionName, Registry};
