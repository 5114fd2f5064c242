//! `glof`: command-line driver for the GLOF risk pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use glofrisk::core::pipeline::{Epoch, GlofPipeline};
use glofrisk::PipelineConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "glof",
    version,
    about = "Per-pixel glacial lake outburst flood risk mapping"
)]
struct Cli {
    /// TOML configuration file; reference defaults when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build feature tables from the configured rasters
    Extract {
        /// Only extract this epoch
        #[arg(long, value_parser = ["historical", "new"])]
        epoch: Option<String>,
    },
    /// Cluster the historical table and label it with risk levels
    Calibrate,
    /// Calibrate, then fit and evaluate the classifier
    Train,
    /// Classify the new-epoch table with the saved model
    Predict,
    /// Run every stage in one pass
    Run,
    /// Print the effective configuration
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let pipeline = || GlofPipeline::new(config.clone()).context("invalid configuration");

    match cli.command {
        Command::Extract { epoch } => {
            let pipeline = pipeline()?;
            match epoch.as_deref() {
                Some("historical") => {
                    pipeline
                        .extract_epoch(Epoch::Historical)
                        .context("historical feature extraction failed")?;
                }
                Some(_) => {
                    pipeline
                        .extract_epoch(Epoch::New)
                        .context("new-epoch feature extraction failed")?;
                }
                None => {
                    pipeline.extract().context("feature extraction failed")?;
                }
            }
        }
        Command::Calibrate => {
            pipeline()?.calibrate().context("calibration failed")?;
        }
        Command::Train => {
            let (_, evaluation) = pipeline()?.train().context("training failed")?;
            println!("{}", evaluation);
        }
        Command::Predict => {
            pipeline()?.predict().context("prediction failed")?;
        }
        Command::Run => {
            let summary = pipeline()?.run().context("pipeline run failed")?;
            println!("{}", summary.evaluation);
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
    }

    log::info!("Done");
    Ok(())
}
