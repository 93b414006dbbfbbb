//! aqilens CLI - validate AQI models against a historical dataset.
//!
//! Runs multi-city and walk-forward forecast validation, compares the results
//! with reference figures and writes JSON, Markdown, CSV and SVG reports.

use aqilens_core::models::{LinearModel, ModelRegistry};
use aqilens_core::{Model, ValidationConfig, ValidationError, ValidationRunner};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const EXIT_DATASET: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// aqilens: multi-city and forecast validation for AQI models
#[derive(Parser, Debug)]
#[command(name = "aqilens", version, about, long_about = None)]
struct Cli {
    /// Historical dataset (CSV, JSON array or JSONL)
    #[arg(short, long)]
    data: PathBuf,

    /// Cities to validate, comma separated [default: Delhi,Mumbai,Bangalore]
    #[arg(long, value_delimiter = ',')]
    cities: Vec<String>,

    /// Forecast horizons in hours, comma separated [default: 1,6,12,24,48]
    #[arg(long, value_delimiter = ',')]
    horizons: Vec<u32>,

    /// Refit models even when pre-trained coefficients are available
    #[arg(long)]
    force_retrain: bool,

    /// WAQI API token for live benchmark comparison
    #[arg(long, env = "AQILENS_WAQI_TOKEN", hide_env_values = true)]
    waqi_token: Option<String>,

    /// Directory receiving the report artifacts [default: validation_results]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Models to evaluate, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    models: Vec<String>,

    /// Pre-trained linear coefficients (JSON); may be repeated
    #[arg(long)]
    pretrained: Vec<PathBuf>,

    /// Extra benchmark references (JSON or TOML)
    #[arg(long)]
    benchmarks: Option<PathBuf>,

    /// Seed for the hold-out sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Validate cities on parallel worker threads
    #[arg(long)]
    parallel: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Fold command-line flags into the layered configuration.
    fn apply_overrides(&self, config: &mut ValidationConfig) {
        if !self.cities.is_empty() {
            config.cities = self.cities.iter().map(|c| c.trim().to_string()).collect();
        }
        if !self.horizons.is_empty() {
            config.forecasting.horizons = self.horizons.clone();
        }
        if self.force_retrain {
            config.force_retrain = true;
        }
        if self.parallel {
            config.parallel = true;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(token) = &self.waqi_token {
            config.benchmark.waqi_token = Some(token.clone());
        }
        if let Some(path) = &self.benchmarks {
            config.benchmark.reference_file = Some(path.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.report.output_dir = dir.clone();
        }
    }

    fn registry(&self) -> Result<ModelRegistry, ValidationError> {
        let mut registry = ModelRegistry::builtin();
        for path in &self.pretrained {
            let model = LinearModel::from_file(path)?;
            tracing::info!(model = model.name(), path = %path.display(), "Loaded pre-trained model");
            registry.register(Arc::new(model));
        }
        if self.models.is_empty() {
            Ok(registry)
        } else {
            registry.select(&self.models)
        }
    }
}

fn init_tracing(cli: &Cli) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = match cli.verbose {
        0 if cli.quiet => "error".to_string(),
        0 => std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "aqilens", "aqilens")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "aqilens.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let workspace = std::env::current_dir().ok();
    let mut config = aqilens_core::load_config(workspace.as_deref(), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);
    let registry = cli.registry()?;

    let dataset = match aqilens_core::data::load_dataset(&cli.data) {
        Ok(dataset) => dataset,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "Dataset could not be loaded");
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(EXIT_DATASET));
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next checkpoint");
            ctrl_c.cancel();
        }
    });

    let runner = ValidationRunner::new(config, registry).with_cancellation(cancel);
    let outcome = match runner.run(&dataset, &cli.data.display().to_string()).await {
        Ok(outcome) => outcome,
        Err(ValidationError::Cancelled) => {
            eprintln!("Validation cancelled");
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
        Err(e) => return Err(e.into()),
    };

    if !cli.quiet {
        for artifact in &outcome.artifacts {
            for file in &artifact.files {
                println!("  wrote {}", file.display());
            }
        }
    }
    for failed in outcome.failed_writers() {
        eprintln!(
            "  {} report failed: {}",
            failed.writer,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    if !outcome.report.summary.unavailable_sections.is_empty() {
        eprintln!(
            "  unavailable sections: {}",
            outcome.report.summary.unavailable_sections.join(", ")
        );
    }
    println!("{}", outcome.summary_line());
    Ok(ExitCode::SUCCESS)
}
