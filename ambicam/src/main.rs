//! Ambient lighting host
//!
//! Loads the config file, optionally starts a pipeline and then reads control
//! commands from stdin until `quit` or end of input.
//!
//! Usage: cargo run -p ambicam -- --config config.json --start camera

use std::path::PathBuf;
use std::sync::Arc;

use ambicam_pipeline_lib::{ConfigStore, Controller, LogLevel, Variant};
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

mod console;

#[derive(Parser, Debug)]
#[command(name = "ambicam")]
#[command(about = "Drive ambient LEDs from a camera watching a display")]
struct Args {
    /// JSON config file, created on first change if missing
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Variant to start right away (camera or rainbow)
    #[arg(short, long)]
    start: Option<Variant>,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<LogLevel>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Filter everything here and cap with the configured level below
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace")).init();
    log::set_max_level(args.log_level.unwrap_or_default().as_level_filter());

    let store = Arc::new(ConfigStore::load_or_default(&args.config));
    let level = args
        .log_level
        .unwrap_or_else(|| store.read(|c| c.log_level));
    log::set_max_level(level.as_level_filter());
    info!("Log level set to {level:?}");

    let controller = Controller::new(store);
    if let Some(variant) = args.start {
        match controller.start(variant) {
            Ok(status) => info!("Started: {status:?}"),
            Err(e) => error!("Failed to start {variant}: {e}"),
        }
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    console::run(&controller, stdin.lock(), stdout.lock()).context("console I/O failed")?;

    controller.stop();
    info!("Bye");
    Ok(())
}
