//! PDS calibration CLI: photon-detector waveform analysis and gain calibration.
//!
//! This is the main entry point for the `pds` tool.

mod config;
mod orchestrator;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pds_types::{AdcTrace, MeanSelection};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pds")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a gain calibration
    Calibrate {
        /// Path to the calibration configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for results
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Read waveform files and summarise their content
    Inspect {
        /// Waveform files (.txt, .dat or .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Average every waveform of a file
    MeanWaveform {
        /// Waveform file
        file: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Calibrate { config, output } => {
            run_calibration(&config, &output, cli.format)?;
        }
        Commands::Inspect { files } => {
            inspect(&files)?;
        }
        Commands::MeanWaveform { file, output } => {
            mean_waveform(&file, output)?;
        }
    }

    Ok(())
}

fn run_calibration(config_path: &Path, output_dir: &Path, format: OutputFormat) -> Result<()> {
    tracing::info!("Loading configuration from {:?}", config_path);

    let config = config::load_config(config_path)?;
    let orchestrator = orchestrator::Orchestrator::new(config)?;

    tracing::info!("Starting calibration...");
    let results = orchestrator.run()?;

    // Create output directory
    std::fs::create_dir_all(output_dir)?;

    // Write results
    output::write_results(&results, output_dir, format)?;
    output::print_results(&results);

    tracing::info!("Calibration complete. Results written to {:?}", output_dir);
    Ok(())
}

fn inspect(files: &[PathBuf]) -> Result<()> {
    tracing::info!("Inspecting {} file(s)", files.len());

    let set = pds_readers::read_many(files).context("Failed to read waveform files")?;

    println!("Waveforms: {}", set.len());
    println!("Points per waveform: {}", set.points_per_wf());
    println!("Runs: {:?}", set.runs());

    for (endpoint, channels) in set.run_collapsed_available_channels() {
        println!("\n  Endpoint {}", endpoint);
        println!("    Channels: {:?}", channels);
    }

    Ok(())
}

fn mean_waveform(file: &Path, output: Option<PathBuf>) -> Result<()> {
    tracing::info!("Averaging waveforms of {:?}", file);

    let mut set = pds_readers::read_waveform_set(file)
        .with_context(|| format!("Failed to read {:?}", file))?;
    let mean = set.compute_mean_waveform(MeanSelection::All)?;

    println!("Mean waveform:");
    println!("  Averaged waveforms: {}", mean.source_indices().len());
    println!("  Samples: {}", mean.adcs().len());

    if let Some(output_path) = output {
        // Write as CSV
        let mut writer = std::fs::File::create(&output_path)?;
        writeln!(writer, "time_ns,adc")?;
        let step = mean.time_step();
        for (i, &v) in mean.adcs().iter().enumerate() {
            writeln!(writer, "{},{}", step.0 * i as f64, v)?;
        }
        println!("  Written to: {:?}", output_path);
    }

    Ok(())
}
