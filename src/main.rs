//! reward-keys
//!
//! Turns Twitch channel-point redemptions into key presses, holds, and
//! mouse clicks on the local machine.

mod config;
mod console;
mod dispatch;
mod focus;
mod input;
mod lifecycle;
mod logging;
mod setup;
mod sound;
mod twitch;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use console::ControlSignal;
use lifecycle::{Coordinator, Options};

fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = match logging::init_logging() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                .with(tracing_subscriber::fmt::layer())
                .init();
            warn!("File logging unavailable: {:#}", e);
            None
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let options = parse_options(&args)?;

    info!("reward-keys starting...");
    if let Ok(dir) = logging::get_log_dir() {
        info!("Writing logs to {:?}", dir);
    }

    let runtime = tokio::runtime::Runtime::new()?;

    let (control_tx, control_rx) = mpsc::unbounded_channel();

    // Ctrl+C goes through the same path as the console's `exit`
    let ctrl_c_tx = control_tx.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = ctrl_c_tx.send(ControlSignal::Exit);
    })?;

    runtime.block_on(async move {
        let lines = console::spawn_stdin_reader();
        let backend = input::create_input_backend();
        let windows = focus::create_window_system();
        Coordinator::new(options, lines, control_tx, control_rx, backend, windows)
            .run()
            .await;
    });

    info!("Shutdown complete");
    Ok(())
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--setup" | "-s" => options.force_setup = true,
            "--config" | "-c" => match iter.next() {
                Some(path) => options.config_path = Some(PathBuf::from(path)),
                None => bail!("--config requires a path"),
            },
            other => bail!("Unknown argument: {} (see --help)", other),
        }
    }
    Ok(options)
}

fn print_help() {
    println!("reward-keys - Twitch channel point rewards to keyboard and mouse input");
    println!();
    println!("USAGE:");
    println!("    reward-keys [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    -s, --setup           Run the setup prompt even if settings are complete");
    println!("    -c, --config <PATH>   Use a settings file other than the default");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG              Set log level (e.g., debug, info, warn)");
    println!("    REWARD_KEYS_LOG_PATH  Override the log directory");
    println!();
    println!("Type 'help' at the console once running for the list of commands.");
}
