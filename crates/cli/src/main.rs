//! Rightsize CLI
//!
//! Evaluates SLA rules against resource usage windows and recommends
//! container requests and limits from usage percentiles.

mod commands;
mod config;
mod input;
mod output;

use analysis_lib::{render_metrics, AnalyzerMetrics, StructuredLogger};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::evaluate::EvaluateArgs;
use commands::size::SizeArgs;
use commands::{evaluate, labels, size, RunContext};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SLA rule evaluation and container right-sizing
#[derive(Parser)]
#[command(name = "rightsize")]
#[command(author, version, about = "Rightsize: SLA rule evaluation and container right-sizing", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to ~/.config/rightsize/config.{toml,json,yaml})
    #[arg(long, global = true, env = "RIGHTSIZE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write Prometheus text-format metrics to this file after the run
    #[arg(long, global = true)]
    pub metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate the rules of a rule document against a data window
    Evaluate {
        /// Rule document (JSON)
        #[arg(long, short)]
        rules: PathBuf,

        /// Data window (JSON samples or matrix)
        #[arg(long, short)]
        data: PathBuf,

        /// Only evaluate this namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Replace limit_pct of every rule that defines one
        #[arg(long)]
        limit_pct: Option<f64>,

        /// Window start (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Window end (RFC 3339), defaults to now
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Window length in hours when no start is given
        #[arg(long)]
        delta_hours: Option<f64>,
    },

    /// Recommend requests and limits from one or more data windows
    Size {
        /// Data windows (JSON samples or matrix), merged per container
        #[arg(long, short, required = true, num_args = 1..)]
        data: Vec<PathBuf>,

        /// Only size this namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Also print per-entity percentile tables
        #[arg(long)]
        percentiles: bool,

        /// Write the merged sizing as INI to this file
        #[arg(long)]
        ini: Option<PathBuf>,
    },

    /// Parse Prometheus label text and print the labels
    Labels {
        /// Label text such as '{container="app",pod="app-1"}'
        #[arg(required = true)]
        texts: Vec<String>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run(cli: Cli) -> Result<usize> {
    let settings = config::Settings::load(cli.config.as_deref())?;
    let ctx = RunContext {
        settings,
        format: cli.format,
        metrics: AnalyzerMetrics::new(),
        logger: StructuredLogger::new(env!("CARGO_PKG_NAME")),
    };

    let started = Instant::now();
    let (name, failures) = match cli.command {
        Commands::Evaluate {
            rules,
            data,
            namespace,
            limit_pct,
            start,
            end,
            delta_hours,
        } => {
            let args = EvaluateArgs {
                rules,
                data,
                namespace,
                limit_pct,
                start,
                end,
                delta_hours,
            };
            ("evaluate", evaluate::run(&ctx, args).await?)
        }
        Commands::Size {
            data,
            namespace,
            percentiles,
            ini,
        } => {
            let args = SizeArgs {
                data,
                namespace,
                percentiles,
                ini,
            };
            ("size", size::run(&ctx, args).await?)
        }
        Commands::Labels { texts } => ("labels", labels::run(&ctx, &texts)?),
    };
    ctx.logger
        .log_run_finished(name, failures, started.elapsed().as_secs_f64());

    if let Some(path) = &cli.metrics_file {
        let text = render_metrics().context("Failed to render metrics")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }
    Ok(failures)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            output::print_error(&format!("{failures} item(s) failed"));
            ExitCode::FAILURE
        }
        Err(err) => {
            output::print_error(&format!("{err:#}"));
            ExitCode::from(2)
        }
    }
}
