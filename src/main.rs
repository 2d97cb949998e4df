//! api-fuzzer - schema-aware API security fuzzing from the command line

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api_fuzzer::error::UserHint;
use api_fuzzer::fuzzer::{FuzzPlan, FuzzerConfig};
use api_fuzzer::{Config, FuzzSession, FuzzerError, GenerationMode, SchemaFuzzGenerator};

/// Schema-aware API security fuzzer
#[derive(Parser, Debug)]
#[command(name = "api-fuzzer")]
#[command(author, version, about = "Schema-aware API security fuzzer", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "API_FUZZER_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "API_FUZZER_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables daily rotated file logging)
    #[arg(long, global = true, env = "API_FUZZER_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, global = true, env = "API_FUZZER_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a fuzz plan and print accepted results as JSON lines
    Fuzz {
        /// Plan file (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Override the number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the rate limit (requests per second)
        #[arg(long)]
        rate_limit: Option<u32>,

        /// Override the concurrency limit
        #[arg(long)]
        concurrency_limit: Option<usize>,

        /// Print the result summary after the results
        #[arg(long)]
        summary: bool,
    },

    /// Print values generated from a JSON schema, one per line
    Generate {
        /// Schema file (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// valid-only, invalid-only or both (defaults to the configured mode)
        #[arg(short, long)]
        mode: Option<GenerationMode>,

        /// Number of values to print
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle special commands first
    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    let config = Config::load(cli.config.as_deref())?;
    config.validate().map_err(|e| {
        tracing::error!(error = %e, "{}", e.user_hint());
        e
    })?;

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    match cli.command {
        Some(Command::Fuzz {
            plan,
            workers,
            rate_limit,
            concurrency_limit,
            summary,
        }) => {
            let mut engine = FuzzerConfig::from_config(&config);
            let overrides = EngineOverrides {
                workers,
                rate_limit,
                concurrency_limit,
            };
            run_fuzz(&config, &mut engine, &plan, overrides, summary).await
        }
        Some(Command::Generate {
            schema,
            mode,
            count,
            seed,
        }) => run_generate(&schema, mode.unwrap_or(config.engine.generation_mode), count, seed),
        None => {
            tracing::warn!("Nothing to do; see --help");
            Ok(())
        }
    }
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let path = Path::new(log_path);
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {:?}", dir))?;
        let filename = path.file_name().and_then(|s| s.to_str()).unwrap_or("api-fuzzer.log");
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, filename);

        if cli.log_json {
            subscriber
                .with(fmt::layer().json().with_writer(file_appender).with_ansi(false))
                .init();
        } else {
            subscriber
                .with(fmt::layer().with_writer(file_appender).with_ansi(false))
                .init();
        }
    } else if cli.log_json {
        // stdout carries results; logs go to stderr
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    Ok(())
}

struct EngineOverrides {
    workers: Option<usize>,
    rate_limit: Option<u32>,
    concurrency_limit: Option<usize>,
}

async fn run_fuzz(
    config: &Config,
    engine: &mut FuzzerConfig,
    plan_path: &Path,
    overrides: EngineOverrides,
    summary: bool,
) -> Result<()> {
    let plan = FuzzPlan::load(plan_path).with_context(|| format!("Failed to load plan {:?}", plan_path))?;

    *engine = std::mem::take(engine).with_plan(&plan);
    if let Some(workers) = overrides.workers {
        engine.workers = workers;
    }
    if overrides.rate_limit.is_some() {
        engine.rate_limit = overrides.rate_limit;
    }
    if overrides.concurrency_limit.is_some() {
        engine.concurrency_limit = overrides.concurrency_limit;
    }
    if engine.workers == 0 {
        anyhow::bail!("At least one worker is required");
    }

    let session = Arc::new(FuzzSession::with_client(engine.clone(), &config.http)?);
    tokio::spawn(handle_signals(session.clone()));

    tracing::info!(plan = %plan_path.display(), "Starting fuzz run");
    let results = session
        .run_plan(&plan, plan_path.parent())
        .await
        .map_err(|e: FuzzerError| anyhow::anyhow!(e.user_message()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for result in &results.results {
        serde_json::to_writer(&mut out, result)?;
        writeln!(out)?;
    }
    if summary {
        serde_json::to_writer(&mut out, &results.stats())?;
        writeln!(out)?;
    }

    Ok(())
}

fn run_generate(schema_path: &Path, mode: GenerationMode, count: usize, seed: Option<u64>) -> Result<()> {
    let text = std::fs::read_to_string(schema_path).with_context(|| format!("Failed to read schema {:?}", schema_path))?;
    let schema: serde_json::Value = serde_json::from_str(&text).context("Schema is not valid JSON")?;

    let strategy = SchemaFuzzGenerator::new(mode)
        .parse_and_generate_strategy(&schema)
        .map_err(|e| anyhow::anyhow!(FuzzerError::from(e).user_message()))?;

    let seed = seed.unwrap_or_else(rand::random);
    tracing::info!(%mode, seed, count, "Generating values");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for value in strategy.samples(seed).take(count) {
        serde_json::to_writer(&mut out, &value)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    println!("{}", Config::default().to_toml()?);
    Ok(())
}

/// Stop the session on SIGINT/SIGTERM
async fn handle_signals(session: Arc<FuzzSession>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to register signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping fuzz session");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping fuzz session");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to register Ctrl+C handler");
            return;
        }
        tracing::info!("Received Ctrl+C, stopping fuzz session");
    }

    session.stop();
}
