//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Order Insights - ask questions about your sales in plain language
///
/// Questions are answered by a language model that calls a fixed set of
/// aggregate functions over the tenant's orders. Functions and read-only
/// queries can also be run directly.
///
/// Examples:
///   order-insights --tenant acme --ask "How much did I sell this month?"
///   order-insights --tenant acme --function monthly_sales --params '{"period_days": 180}'
///   order-insights --tenant acme --sql "SELECT status, COUNT(*) FROM orders GROUP BY status"
///   order-insights --check-sql "SELECT * FROM users"
///   order-insights --list-functions
///   order-insights --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Tenant whose orders are queried
    ///
    /// Falls back to `general.default_tenant` in .order-insights.toml.
    #[arg(short, long, value_name = "ID", env = "ORDER_INSIGHTS_TENANT")]
    pub tenant: Option<String>,

    /// Ask a question in natural language
    #[arg(short, long, value_name = "QUESTION", conflicts_with_all = ["function", "sql", "check_sql"])]
    pub ask: Option<String>,

    /// Run a registry function directly (see --list-functions)
    #[arg(short, long, value_name = "NAME", conflicts_with_all = ["sql", "check_sql"])]
    pub function: Option<String>,

    /// JSON parameters for --function
    ///
    /// Example: --params '{"marketplace": "amazon", "current_month": true}'
    #[arg(short, long, value_name = "JSON", requires = "function")]
    pub params: Option<String>,

    /// Run a read-only SELECT over the orders table
    #[arg(long, value_name = "QUERY", conflicts_with = "check_sql")]
    pub sql: Option<String>,

    /// Only sanitize a query and print the outcome (no database needed)
    #[arg(long, value_name = "QUERY")]
    pub check_sql: Option<String>,

    /// Output format for --function and --sql results (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Postgres connection string
    #[arg(long, value_name = "URL", env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Gemini model to use
    #[arg(short, long, env = "ORDER_INSIGHTS_MODEL")]
    pub model: Option<String>,

    /// Gemini API base URL
    #[arg(long, value_name = "URL", env = "GEMINI_API_URL")]
    pub api_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .order-insights.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// List the available functions and exit
    #[arg(long)]
    pub list_functions: bool,

    /// Generate a default .order-insights.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// What the invocation asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InitConfig,
    ListFunctions,
    CheckSql(String),
    Sql(String),
    Function { name: String, params: Option<String> },
    Ask(String),
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The command selected by the flags. Validate first.
    pub fn command(&self) -> Option<Command> {
        if self.init_config {
            Some(Command::InitConfig)
        } else if self.list_functions {
            Some(Command::ListFunctions)
        } else if let Some(ref query) = self.check_sql {
            Some(Command::CheckSql(query.clone()))
        } else if let Some(ref query) = self.sql {
            Some(Command::Sql(query.clone()))
        } else if let Some(ref name) = self.function {
            Some(Command::Function {
                name: name.clone(),
                params: self.params.clone(),
            })
        } else {
            self.ask.clone().map(Command::Ask)
        }
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config || self.list_functions {
            return Ok(());
        }

        if self.command().is_none() {
            return Err(
                "Nothing to do: use --ask, --function, --sql, --check-sql or --list-functions"
                    .to_string(),
            );
        }

        if let Some(ref question) = self.ask {
            if question.trim().is_empty() {
                return Err("Question must not be empty".to_string());
            }
        }

        if let Some(ref params) = self.params {
            let is_object = serde_json::from_str::<serde_json::Value>(params)
                .map(|v| v.is_object())
                .unwrap_or(false);
            if !is_object {
                return Err("--params must be a JSON object".to_string());
            }
        }

        // Validate API URL format
        if let Some(ref api_url) = self.api_url {
            if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Validate temperature range
        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
