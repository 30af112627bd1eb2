//! Batch CLI driving the rollguard pipeline.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rollguard_core::catalog::{FileCatalog, FileKind};
use rollguard_core::config::PipelineConfig;
use rollguard_core::pipeline::{JsonLinesSink, Pipeline, SessionOutput, SessionSink};

/// Rollguard -- driving-session reconstruction and rollover-risk alarms.
#[derive(Parser, Debug)]
#[command(name = "rollguard", version, about)]
struct Cli {
    /// Path to the pipeline config file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Catalog a directory tree and print what was found, without running
    /// correlation or scoring.
    Scan {
        /// Root directory containing recorder log files.
        root: PathBuf,
    },

    /// Run the full pipeline: scan, correlate, score, alarm.
    Run {
        /// Root directory containing recorder log files.
        root: PathBuf,

        /// Stream sessions as JSON lines to stdout.
        #[arg(long)]
        json: bool,

        /// Write sessions as JSON lines to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Parse the config file and echo the effective configuration.
    CheckConfig,
}

fn main() -> Result<()> {
    // All logging goes to stderr so `run --json` keeps stdout machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Scan { root } => scan(&root)?,
        Commands::Run { root, json, output } => run(&root, config, json, output)?,
        Commands::CheckConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn scan(root: &Path) -> Result<()> {
    let catalog = FileCatalog::scan(root)?;

    for kind in [
        FileKind::Engine,
        FileKind::Position,
        FileKind::Inertial,
        FileKind::Beacon,
    ] {
        println!("{kind}: {} file(s)", catalog.of_kind(kind).count());
    }
    println!("live excluded: {}", catalog.live_excluded.len());
    println!("unknown: {}", catalog.unknown.len());
    for path in &catalog.unknown {
        println!("  ? {}", path.display());
    }
    Ok(())
}

fn run(root: &Path, config: PipelineConfig, json: bool, output: Option<PathBuf>) -> Result<()> {
    let pipeline = Pipeline::new(config);

    let mut sink: Box<dyn SessionSink> = match (&output, json) {
        (Some(path), _) => {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            Box::new(JsonLinesSink::new(Box::new(file) as Box<dyn Write>))
        }
        (None, true) => Box::new(JsonLinesSink::new(
            Box::new(std::io::stdout()) as Box<dyn Write>
        )),
        (None, false) => Box::new(DiscardSink),
    };

    let report = pipeline.run(root, sink.as_mut())?;
    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Sink for report-only runs: sessions are computed and counted, not stored.
struct DiscardSink;

impl SessionSink for DiscardSink {
    fn store_session(&mut self, _output: &SessionOutput) -> Result<()> {
        Ok(())
    }
}
