use anyhow::Context;
use clap::{Parser, Subcommand};
use rulesrv::{create_routes, open_repository, rule_files, Config, Runtime};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "RULESRV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler and HTTP API (default)
    Serve,

    /// Evaluate all due rules once and print the report
    Evaluate,

    /// Check rule documents without touching the database
    Validate {
        /// JSON or YAML rule file
        file: PathBuf,
    },

    /// Validate and upsert rule documents into the database
    Import {
        /// JSON or YAML rule file
        file: PathBuf,
    },

    /// List stored rules
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard =
        rulesrv::logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Evaluate => evaluate_once(config).await,
        Commands::Validate { file } => validate_file(&file),
        Commands::Import { file } => import_file(&config, &file).await,
        Commands::List => list_rules(&config).await,
    }
}

/// Run the rules service
async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.api.socket_addr()?;
    info!("Starting {} on {}", config.service.name, addr);

    let mut runtime = Runtime::build(config).await?;
    let handles = runtime.spawn_background();
    let scheduler = runtime.state.scheduler.clone();
    let app = create_routes(runtime.state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    scheduler.stop();
    // First handle is the scheduler loop; the worker ends with the process
    if let Some(handle) = handles.into_iter().next() {
        if let Err(e) = handle.await {
            error!("Scheduler task failed: {}", e);
        }
    }
    info!("Rules service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

async fn evaluate_once(config: Config) -> anyhow::Result<()> {
    let mut runtime = Runtime::build(config).await?;
    let worker = runtime.spawn_action_worker();

    let scheduler = runtime.state.scheduler.clone();
    let report = scheduler.evaluate_due(scheduler.now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    drop(scheduler);
    runtime.drain(worker).await;
    Ok(())
}

fn validate_file(file: &Path) -> anyhow::Result<()> {
    let rules = rule_files::load_rules(file)?;
    let failures = rule_files::check_rules(&rules);

    for rule in &rules {
        match failures.iter().find(|(id, _)| *id == rule.id) {
            Some((_, reason)) => println!("  FAIL {}: {}", rule.id, reason),
            None => println!("  OK   {} ({} nodes)", rule.id, rule.nodes.len()),
        }
    }

    if failures.is_empty() {
        println!("{} rule(s) valid", rules.len());
        Ok(())
    } else {
        anyhow::bail!("{} of {} rule(s) invalid", failures.len(), rules.len())
    }
}

async fn import_file(config: &Config, file: &Path) -> anyhow::Result<()> {
    let rules = rule_files::load_rules(file)?;
    let repository = open_repository(&config.database.url).await?;
    let count = rule_files::import_rules(&repository, &rules).await?;
    println!("Imported {} rule(s) into {}", count, config.database.url);
    Ok(())
}

async fn list_rules(config: &Config) -> anyhow::Result<()> {
    use telemetry_rules::RuleRepository;

    let repository = open_repository(&config.database.url).await?;
    let rules = repository.list_rules().await?;

    println!("Available rules:");
    for rule in rules {
        println!(
            "  - {} ({}) [{}] every {}s, last run {}: {}",
            rule.id,
            rule.name,
            if rule.enabled { "enabled" } else { "disabled" },
            rule.interval,
            rule.last_run.to_rfc3339(),
            rule.description
        );
    }

    Ok(())
}
