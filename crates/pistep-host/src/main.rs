//! # pistep
//!
//! The launcher for the multi-motor stepping engine. It loads a JSON motor
//! set, connects to the pigpio daemon, builds the motor group, and hands
//! control to an interactive console through which motors can be commanded
//! and their observable cells read and edited.
//!
//! Logging goes to stdout by default; `--verbose` raises the level to debug
//! and routes output to stderr, and `--log-file` redirects it to a file.

use anyhow::{Context, Result};
use clap::Parser;
use pigpiod_client::{client::DEFAULT_ADDR, PigpiodClient};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use stepper_core::{build_group, MotorSetConfig};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

mod console;

/// Multi-motor stepper driver for DMA-capable GPIO via the pigpio daemon.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the motor set configuration file.
    #[arg(short, long, default_value = "motorset.json")]
    config: PathBuf,

    /// Log at debug level, to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Redirect log output to this file.
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,

    /// Address of the pigpio daemon.
    #[arg(long, default_value = DEFAULT_ADDR)]
    pigpiod: String,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None if cli.verbose => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("loading motor set from {}", cli.config.display());
    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let config = MotorSetConfig::from_json(&text)?;

    let engine = Arc::new(
        PigpiodClient::connect(&cli.pigpiod)
            .with_context(|| format!("failed to connect to pigpiod at {}", cli.pigpiod))?,
    );
    let group = build_group(engine, &config)?;

    console::run(&group)?;

    group.clean_stop();
    info!("shut down cleanly");
    Ok(())
}
