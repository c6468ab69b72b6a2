//! VSWR Console - operator console for the VSWR test fixture
//!
//! Select the device and test type, capture a baseline, scan, and save the
//! plot of accepted units. The scanner link is released on every exit path.

use anyhow::Context;
use clap::Parser;
use std::io::IsTerminal;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::ExitCode;
use vswr_core::cli::{init_tracing, CliResult, Console, ExitCodes};
use vswr_core::{open_scanner, ConsoleConfig, PngArtifactStore, ScanSession};

/// VSWR test console
#[derive(Parser, Debug)]
#[command(name = "vswr-console", version, about = "Operator console for VSWR test fixtures", long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "VSWR_CONFIG")]
    config: Option<PathBuf>,

    /// Scanner serial port, overriding the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Alternate parameter catalog (JSON)
    #[arg(long)]
    params: Option<PathBuf>,

    /// Use the simulated scanner instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Read the serial number as a line instead of raw keystrokes
    #[arg(long)]
    line_entry: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match ConsoleConfig::load(args.config.as_deref()) {
        Ok(config) => config.with_port(args.port.clone()).with_params_file(args.params.clone()),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let log_dir = config
        .logging
        .file_logging
        .then(|| config.logging.directory())
        .flatten();
    let _log_guard = init_tracing(&config.logging.level, log_dir.as_deref(), config.logging.json);

    // Unwinding drops the session, which releases the scanner.
    match panic::catch_unwind(AssertUnwindSafe(|| run(&args, &config))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::from(ExitCodes::ERROR)
        }
        Err(payload) => {
            let result = CliResult::from_panic(payload.as_ref());
            let message = result.message().unwrap_or_default();
            tracing::error!("{}", message);
            eprintln!("Error: {message}");
            result.to_exit_code()
        }
    }
}

fn run(args: &Args, config: &ConsoleConfig) -> anyhow::Result<()> {
    tracing::info!("Starting VSWR console v{}", vswr_core::VERSION);

    let catalog = config.load_catalog().context("loading parameter catalog")?;
    let mut session = ScanSession::new(open_scanner(&config.serial, args.simulate));

    let handle = session.shutdown_handle();
    let wait = config.serial.longest_operation();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupted; releasing scanner");
        if !handle.shutdown_within(wait) {
            tracing::error!("Scanner still busy after {:?}; exiting without release", wait);
        }
        std::process::exit(130);
    })
    .context("installing Ctrl-C handler")?;

    let mut store = PngArtifactStore::default();
    let keystrokes = !args.line_entry && std::io::stdin().is_terminal();
    let stdin = std::io::stdin();
    let mut console = Console::new(stdin.lock(), std::io::stdout()).keystroke_entry(keystrokes);

    let outcome = console.run(&catalog, &mut session, &mut store, config.catalog.baseline_samples);

    // Exit already released the link; this covers I/O errors ending the loop.
    // Dropping the session covers panics.
    if let Err(e) = session.shutdown() {
        tracing::error!("Scanner shutdown failed: {}", e);
    }
    outcome.context("console I/O")?;
    Ok(())
}
