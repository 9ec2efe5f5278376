//! Deterministic rendering of function results.

pub mod chart;
pub mod fallback;

pub use chart::{ChartSpec, ChartType};
pub use fallback::{render_error, render_query_result, render_tool_result};
