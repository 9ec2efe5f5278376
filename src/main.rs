//! Order Insights - natural-language analytics over order data
//!
//! A CLI that answers business questions about a tenant's orders using a
//! Gemini model with function calling over a fixed set of aggregate
//! functions.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, database, invalid input, etc.)
//!   2 - --check-sql rejected the query

mod cli;
mod config;

use anyhow::{bail, Context, Result};
use cli::{Args, Command, OutputFormat};
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use order_insights::agent::{ChatRequest, GeminiProvider, Orchestrator, OrchestratorConfig};
use order_insights::clock::SystemClock;
use order_insights::models::{QueryParams, QueryResult, TenantId};
use order_insights::registry::{FunctionName, Registry, CUSTOM_QUERY_FUNCTION};
use order_insights::report::render_query_result;
use order_insights::sanitizer::sanitize_query;
use order_insights::store::PgOrderStore;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Order Insights v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .order-insights.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Set the API key in the variable named by model.api_key_env.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run the selected command. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let Some(command) = args.command() else {
        bail!("no command given");
    };

    match command {
        Command::InitConfig => {
            handle_init_config()?;
            Ok(0)
        }
        Command::ListFunctions => {
            list_functions();
            Ok(0)
        }
        Command::CheckSql(query) => {
            let outcome = sanitize_query(&query);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(if outcome.is_valid() { 0 } else { 2 })
        }
        Command::Sql(query) => {
            let (registry, tenant) = connect(&config).await?;
            let result = registry.run_custom_query(&query, &tenant).await?;
            print_result(&result, args.format)?;
            Ok(0)
        }
        Command::Function { name, params } => {
            let function = FunctionName::from_str(&name)?;
            let params = match params {
                Some(raw) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&raw).context("Failed to parse --params")?;
                    QueryParams::from_json(&value)?
                }
                None => QueryParams::default(),
            };

            let (registry, tenant) = connect(&config).await?;
            let result = registry.call(function, &params, &tenant).await?;
            print_result(&result, args.format)?;
            Ok(0)
        }
        Command::Ask(question) => {
            let (registry, tenant) = connect(&config).await?;
            ask(&config, registry, tenant, question, args.format).await?;
            Ok(0)
        }
    }
}

fn list_functions() {
    println!("📚 Available functions:\n");
    for function in FunctionName::ALL {
        println!("  {:<22} {}", function.as_str(), function.description());
    }
    println!(
        "  {:<22} Sanitized read-only SELECT over the orders table (--sql)",
        CUSTOM_QUERY_FUNCTION
    );
}

/// Connect the store and resolve the tenant.
async fn connect(config: &Config) -> Result<(Arc<Registry>, TenantId)> {
    let tenant = config
        .general
        .default_tenant
        .clone()
        .context("No tenant given: use --tenant or general.default_tenant")?;
    let tenant = TenantId::new(tenant)?;

    let database_url = config
        .store
        .database_url
        .as_deref()
        .context("No database configured: set DATABASE_URL or store.database_url")?;

    info!("Connecting to the order store");
    let store = PgOrderStore::connect(database_url, config.store.max_connections)
        .await
        .context("Failed to connect to the order store")?;

    let registry = Registry::with_cache_ttl(
        Arc::new(store),
        Arc::new(SystemClock),
        chrono::Duration::seconds(config.cache.result_ttl_seconds),
    );
    Ok((Arc::new(registry), tenant))
}

/// Run one conversational turn and print the answer.
async fn ask(
    config: &Config,
    registry: Arc<Registry>,
    tenant: TenantId,
    question: String,
    format: OutputFormat,
) -> Result<()> {
    let provider = GeminiProvider::new(config.gemini_config()).with_context(|| {
        format!(
            "Language model not configured: set {}",
            config.model.api_key_env
        )
    })?;
    info!("Using model {}", provider.model());

    let orchestrator = Orchestrator::new(
        Arc::new(provider),
        registry,
        OrchestratorConfig {
            max_history_turns: config.chat.max_history_turns,
            vocabulary_ttl_seconds: config.cache.vocabulary_ttl_seconds,
        },
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let response = orchestrator
        .handle_turn(ChatRequest {
            message: question,
            history: Vec::new(),
            tenant_id: tenant,
        })
        .await;

    spinner.finish_and_clear();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Markdown => {
            println!("{}", response.text);
            if let Some(ref follow_ups) = response.suggested_follow_ups {
                println!("\n💡 You could also ask:");
                for suggestion in follow_ups {
                    println!("   - {}", suggestion);
                }
            }
            println!(
                "\n🔢 Tokens: {} in / {} out (~${:.6})",
                response.token_usage.input_tokens,
                response.token_usage.output_tokens,
                response.token_usage.estimated_cost_usd
            );
        }
    }
    Ok(())
}

fn print_result(result: &QueryResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Markdown => println!("{}", render_query_result(result)),
    }
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
