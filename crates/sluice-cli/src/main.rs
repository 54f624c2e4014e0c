mod context;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use sluice_client::{HeuristicDetector, ReqwestFetcher};
use sluice_core::batch::ConfigurationUpdate;
use sluice_core::traits::NullStore;
use sluice_core::validation::ConfigurationRequest;
use sluice_core::{
    BatchOperation, ConfigDocument, DocumentStore, Orchestrator, PipelineConfig, SelectionRule,
};
use sluice_db::DatabaseConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use context::AppContext;

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Turn URLs into clean, deduplicated text"
)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StorageArgs {
    /// Keep configurations, rules and documents in PostgreSQL (needs DATABASE_URL)
    #[arg(long, global = true, env = "SLUICE_USE_DATABASE")]
    database: bool,

    /// State file used when PostgreSQL is not enabled
    #[arg(
        long,
        global = true,
        env = "SLUICE_STATE_FILE",
        default_value = "sluice-state.json"
    )]
    state_file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, convert and clean one or more URLs
    Process {
        /// URLs to process
        #[arg(required = true)]
        urls: Vec<String>,

        /// Maximum URLs in flight (defaults to SLUICE_MAX_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Allow requests to private and loopback addresses
        #[arg(long)]
        allow_private: bool,

        /// Register the headless browser scraper
        #[arg(long)]
        browser: bool,

        /// Print pipeline events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Manage per-URL provider configurations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List or apply configuration presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },

    /// Manage scraper selection rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Write every configuration and rule as a JSON document
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a document produced by `export`
    Import {
        /// Path to the JSON document
        file: PathBuf,
    },

    /// Show the latest stored document for a URL (PostgreSQL only)
    Show {
        /// Source URL
        url: String,
    },
}

#[derive(Args)]
struct Targets {
    /// Target URL (repeatable)
    #[arg(short, long = "url")]
    urls: Vec<String>,

    /// Glob matched against URLs seen before (repeatable)
    #[arg(long = "pattern")]
    patterns: Vec<String>,
}

impl Targets {
    fn ensure_any(&self) -> Result<()> {
        if self.urls.is_empty() && self.patterns.is_empty() {
            bail!("Provide at least one --url or --pattern");
        }
        Ok(())
    }
}

#[derive(Args)]
struct ConfigInput {
    /// Provider kind (http, browser, crawl4ai, docling, deepdoctection)
    #[arg(short, long)]
    provider: String,

    /// Parameters as a JSON object
    #[arg(long, default_value = "{}")]
    params: String,

    /// Priority when several configurations exist for a URL
    #[arg(long, default_value_t = 0)]
    priority: i32,

    /// Store the configuration disabled
    #[arg(long)]
    disabled: bool,
}

impl ConfigInput {
    fn to_request(&self) -> Result<ConfigurationRequest> {
        let mut request = ConfigurationRequest::new(&self.provider, parse_params(&self.params)?)
            .with_priority(self.priority);
        request.enabled = !self.disabled;
        Ok(request)
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate and store a configuration for the targets
    Set {
        #[command(flatten)]
        targets: Targets,
        #[command(flatten)]
        input: ConfigInput,
    },

    /// Merge parameters into existing configurations
    Update {
        #[command(flatten)]
        targets: Targets,

        /// Provider kind of the configurations to update
        #[arg(short, long)]
        provider: String,

        /// Parameters to merge, as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        #[arg(long)]
        priority: Option<i32>,

        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Print stored configurations for a URL
    Get {
        #[arg(short, long)]
        url: String,

        /// Only this provider kind
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Delete every configuration of the targets
    Remove {
        #[command(flatten)]
        targets: Targets,
    },

    /// Delete all configurations and overrides
    Clear,

    /// Check parameters without storing them
    Validate {
        #[arg(short, long)]
        provider: String,

        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Print the parameter schema of a provider kind
    Schema {
        /// Provider kind; lists the known kinds when omitted
        provider: Option<String>,
    },

    /// Configure known URLs on a domain, or route the domain by rule
    Domain {
        domain: String,
        #[command(flatten)]
        input: ConfigInput,
    },

    /// Route a file extension by rule and configure known URLs with it
    Extension {
        extension: String,
        #[command(flatten)]
        input: ConfigInput,
    },
}

#[derive(Subcommand)]
enum PresetAction {
    /// List built-in presets
    List,

    /// Apply a preset to the targets
    Apply {
        name: String,
        #[command(flatten)]
        targets: Targets,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Add a selection rule
    Add {
        /// Glob (`*.pdf`), domain (`example.com`) or `/regex/`
        pattern: String,

        #[arg(short, long)]
        provider: String,

        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// List selection rules in declaration order
    List,

    /// Remove every selection rule
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sluice=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let ctx = if cli.storage.database {
        let db_config = DatabaseConfig::from_env().context("Invalid database configuration")?;
        AppContext::open_postgres(&db_config, config).await?
    } else {
        AppContext::open_file(cli.storage.state_file.clone(), config).await?
    };

    match cli.command {
        Commands::Process {
            urls,
            concurrency,
            allow_private,
            browser,
            events,
        } => cmd_process(&ctx, urls, concurrency, allow_private, browser, events).await,
        Commands::Config { action } => cmd_config(&ctx, action).await,
        Commands::Preset { action } => cmd_preset(&ctx, action).await,
        Commands::Rules { action } => cmd_rules(&ctx, action).await,
        Commands::Export { output } => cmd_export(&ctx, output).await,
        Commands::Import { file } => cmd_import(&ctx, file).await,
        Commands::Show { url } => cmd_show(&ctx, &url).await,
    }
}

// ---------------------------------------------------------------------------
// process
// ---------------------------------------------------------------------------

async fn cmd_process(
    ctx: &AppContext,
    urls: Vec<String>,
    concurrency: Option<usize>,
    allow_private: bool,
    browser: bool,
    events: bool,
) -> Result<()> {
    let mut fetcher = ReqwestFetcher::new()?;
    if allow_private {
        fetcher = fetcher.allow_private_urls();
    }
    sluice_client::register_defaults(&ctx.components, fetcher)?;
    register_browser(ctx, browser).await?;

    let failed = match ctx.database() {
        Some(db) => run_batch(ctx, db.documents(), &urls, concurrency, events).await?,
        None => run_batch(ctx, NullStore, &urls, concurrency, events).await?,
    };
    ctx.persist().await?;

    if failed > 0 {
        bail!("{failed} of {} URLs failed", urls.len());
    }
    Ok(())
}

#[cfg(feature = "browser")]
async fn register_browser(ctx: &AppContext, enabled: bool) -> Result<()> {
    use std::sync::Arc;

    if enabled {
        let scraper = sluice_client::BrowserFetcher::new()
            .await
            .context("Failed to start the browser scraper")?;
        ctx.components.scrapers.register(Arc::new(scraper))?;
    }
    Ok(())
}

#[cfg(not(feature = "browser"))]
async fn register_browser(_ctx: &AppContext, enabled: bool) -> Result<()> {
    if enabled {
        bail!("This build has no browser support; rebuild with `--features browser`");
    }
    Ok(())
}

/// Run the batch, printing one JSON line per URL. Returns the failure count.
async fn run_batch<S: DocumentStore>(
    ctx: &AppContext,
    store: S,
    urls: &[String],
    concurrency: Option<usize>,
    events: bool,
) -> Result<usize> {
    let orchestrator = Orchestrator::new(
        HeuristicDetector,
        store,
        ctx.components.clone(),
        &ctx.config,
    );

    let printer = events.then(|| {
        let mut rx = orchestrator.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{line}");
                }
            }
        })
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling URLs not yet started");
            interrupt.cancel();
        }
    });

    let report = orchestrator
        .process_batch(urls, concurrency, cancel)
        .await;

    if let Some(printer) = printer {
        printer.abort();
    }

    for outcome in &report.outcomes {
        let line = match outcome {
            Ok(outcome) => serde_json::to_string(outcome)?,
            Err(error) => serde_json::to_string(&serde_json::json!({
                "status": "failed",
                "error": error,
            }))?,
        };
        println!("{line}");
    }

    tracing::info!(
        concurrency = report.concurrency,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Batch finished"
    );
    Ok(report.failed())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config(ctx: &AppContext, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { targets, input } => {
            targets.ensure_any()?;
            let op = BatchOperation::set(targets.urls, input.to_request()?)
                .with_patterns(targets.patterns);
            let result = ctx.batch.execute_batch_operation(&op).await?;
            print_json(&result)?;
            ctx.persist().await
        }
        ConfigAction::Update {
            targets,
            provider,
            params,
            priority,
            enabled,
        } => {
            targets.ensure_any()?;
            let update = ConfigurationUpdate {
                provider_name: provider,
                parameters: parse_params(&params)?,
                priority,
                enabled,
            };
            let op = BatchOperation::update(targets.urls, update).with_patterns(targets.patterns);
            let result = ctx.batch.execute_batch_operation(&op).await?;
            print_json(&result)?;
            ctx.persist().await
        }
        ConfigAction::Get { url, provider } => {
            let configs: Vec<_> = match provider {
                Some(kind) => ctx
                    .components
                    .parameters
                    .get_parameters(&url, &kind)
                    .await?
                    .into_iter()
                    .collect(),
                None => ctx.components.parameters.configs().list_for_url(&url).await?,
            };
            print_json(&configs)
        }
        ConfigAction::Remove { targets } => {
            targets.ensure_any()?;
            let op = BatchOperation::remove(targets.urls).with_patterns(targets.patterns);
            let result = ctx.batch.execute_batch_operation(&op).await?;
            print_json(&result)?;
            ctx.persist().await
        }
        ConfigAction::Clear => {
            let result = ctx
                .batch
                .execute_batch_operation(&BatchOperation::clear())
                .await?;
            print_json(&result)?;
            ctx.persist().await
        }
        ConfigAction::Validate { provider, params } => {
            let report = ctx
                .components
                .parameters
                .validate(&provider, &parse_params(&params)?)?;
            print_json(&report)?;
            if !report.valid {
                bail!("Parameters for '{provider}' are invalid");
            }
            Ok(())
        }
        ConfigAction::Schema { provider } => match provider {
            Some(kind) => print_json(&ctx.components.parameters.schema(&kind)?),
            None => print_json(&ctx.components.parameters.kinds()),
        },
        ConfigAction::Domain { domain, input } => {
            let targeted = ctx
                .batch
                .configure_by_domain(&domain, &input.to_request()?)
                .await?;
            print_json(&targeted)?;
            ctx.persist().await
        }
        ConfigAction::Extension { extension, input } => {
            let targeted = ctx
                .batch
                .configure_by_extension(&extension, &input.to_request()?)
                .await?;
            print_json(&targeted)?;
            ctx.persist().await
        }
    }
}

// ---------------------------------------------------------------------------
// preset / rules
// ---------------------------------------------------------------------------

async fn cmd_preset(ctx: &AppContext, action: PresetAction) -> Result<()> {
    match action {
        PresetAction::List => print_json(&ctx.batch.presets().list()),
        PresetAction::Apply { name, targets } => {
            targets.ensure_any()?;
            let result = if targets.patterns.is_empty() {
                ctx.batch.apply_preset(&name, &targets.urls).await?
            } else {
                let preset = ctx.batch.presets().get(&name)?;
                let op = BatchOperation::set(targets.urls, preset.configuration)
                    .with_patterns(targets.patterns);
                ctx.batch.execute_batch_operation(&op).await?
            };
            print_json(&result)?;
            ctx.persist().await
        }
    }
}

async fn cmd_rules(ctx: &AppContext, action: RulesAction) -> Result<()> {
    let selector = &ctx.components.selector;
    match action {
        RulesAction::Add {
            pattern,
            provider,
            priority,
        } => {
            let rule = SelectionRule::new(pattern, provider, priority);
            selector.add_rule(rule.clone())?;
            tracing::info!(pattern = %rule.pattern, provider = %rule.provider_name, "Rule added");
            ctx.persist().await
        }
        RulesAction::List => print_json(&selector.rules()),
        RulesAction::Clear => {
            selector.clear_rules();
            ctx.persist().await
        }
    }
}

// ---------------------------------------------------------------------------
// export / import / show
// ---------------------------------------------------------------------------

async fn cmd_export(ctx: &AppContext, output: Option<PathBuf>) -> Result<()> {
    let document = ctx.batch.export().await?;
    let json = serde_json::to_string_pretty(&document)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(
                configurations = document.configurations.len(),
                rules = document.rules.len(),
                path = %path.display(),
                "Exported configuration"
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_import(ctx: &AppContext, file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document: ConfigDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid configuration document {}", file.display()))?;
    let result = ctx.batch.import(document).await?;
    print_json(&result)?;
    ctx.persist().await
}

async fn cmd_show(ctx: &AppContext, url: &str) -> Result<()> {
    let Some(db) = ctx.database() else {
        bail!("Stored documents are only available with --database");
    };
    match db.documents().get_latest(url).await? {
        Some(document) => print_json(&document),
        None => bail!("No document stored for {url}"),
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn parse_params(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("--params is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("--params must be a JSON object, got {other}"),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
