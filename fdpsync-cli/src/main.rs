//! fdpsync CLI: run a sync, check the identifier catalog, manage the config.
//!
//! Commands:
//! - `run`: fetch, reconcile and write the reconciliation workbook
//! - `catalog check`: load the identifier catalog and report on it
//! - `config init`: write a configuration file with every default spelled out
//! - `config check`: load and validate a configuration file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fdpsync_core::{Catalog, MatchStatus, RunReport};
use fdpsync_runner::{Pipeline, PipelineFailure, SyncConfig};

#[derive(Parser)]
#[command(
    name = "fdpsync",
    version,
    about = "Reconcile fund share-class data against a local identifier catalog"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "fdpsync.toml")]
    config: PathBuf,

    /// Log filter (e.g. `debug`, `fdpsync_core=trace`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, reconcile and write the workbook.
    Run {
        /// Write the workbook here instead of the configured path.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keep going when individual batches fail.
        #[arg(long, default_value_t = false)]
        allow_partial: bool,
    },
    /// Identifier catalog commands.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Configuration file commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Load the catalog and report its size and digest.
    Check {
        /// Catalog file. Defaults to the configured path.
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a configuration file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Load and validate the configuration file.
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Run {
            output,
            allow_partial,
        } => run_sync(&cli.config, output, allow_partial),
        Commands::Catalog { action } => match action {
            CatalogAction::Check { path } => run_catalog_check(&cli.config, path),
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => run_config_init(&cli.config, force),
            ConfigAction::Check => run_config_check(&cli.config),
        },
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Load the configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> Result<SyncConfig> {
    if path.exists() {
        SyncConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        info!(path = %path.display(), "no configuration file, using defaults");
        Ok(SyncConfig::default())
    }
}

fn run_sync(config_path: &Path, output: Option<PathBuf>, allow_partial: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(output) = output {
        config.output.path = output;
    }
    config.output.allow_partial |= allow_partial;

    let pipeline = Pipeline::new(config)?;
    let cancel = AtomicBool::new(false);

    match pipeline.run(&cancel) {
        Ok(outcome) => {
            print_summary(&outcome.report);
            println!("Workbook:       {}", outcome.output.display());
            if !outcome.archived.is_empty() {
                println!("Archived:       {} response(s)", outcome.archived.len());
            }
            Ok(())
        }
        Err(failure) => {
            print_failure(&failure);
            std::process::exit(1);
        }
    }
}

fn print_summary(report: &RunReport) {
    let counts = report.counts();
    println!();
    println!("=== Reconciliation ===");
    println!("Run:            {}", report.metadata.run_id);
    if let Some(date) = report
        .metadata
        .reported_content_date
        .or(report.metadata.content_date)
    {
        println!("Content date:   {date}");
    }
    println!("Entries:        {}", counts.total());
    for status in MatchStatus::ALL {
        println!("  {:<26}{}", status.label(), counts.get(status));
    }
    if !report.warnings.is_empty() {
        println!("Warnings:       {}", report.warnings.len());
    }
    if report.is_partial() {
        println!();
        println!("--- Failed batches ---");
        for failure in &report.failures {
            println!("  {failure}");
        }
    }
}

fn print_failure(failure: &PipelineFailure) {
    eprintln!();
    eprintln!("Run failed while {}.", failure.stage);
    match failure.last_completed {
        Some(stage) => eprintln!("Last completed stage: {stage}"),
        None => eprintln!("No stage completed."),
    }
    let mut cause: Option<&dyn std::error::Error> = Some(&failure.source);
    while let Some(err) = cause {
        eprintln!("  caused by: {err}");
        cause = err.source();
    }
    if let Some(report) = &failure.report {
        eprintln!("Reconciliation had completed before the failure:");
        print_summary(report);
    }
}

fn run_catalog_check(config_path: &Path, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => load_config(config_path)?.catalog.path,
    };
    let catalog = Catalog::load(&path)?;

    println!("Catalog:        {}", path.display());
    println!("Identifiers:    {}", catalog.len());
    println!("Digest:         {}", catalog.digest());
    let mut countries: Vec<&str> = catalog.isins().map(|i| i.country()).collect();
    countries.sort_unstable();
    countries.dedup();
    println!("Countries:      {}", countries.join(", "));
    Ok(())
}

fn run_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let content = SyncConfig::default().to_toml()?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run_config_check(path: &Path) -> Result<()> {
    let config = SyncConfig::from_file(path)?;
    config.validate()?;
    println!("Configuration OK: {}", path.display());
    println!("Endpoint:       {}", config.endpoint());
    println!("Catalog:        {}", config.catalog.path.display());
    println!("Output:         {}", config.output.path.display());
    if config.password().is_none() {
        println!(
            "Note: ${} is not set, requests will be sent without a password",
            config.remote.password_env
        );
    }
    Ok(())
}
