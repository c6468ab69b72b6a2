//! VSWR CLI - scriptable access to the catalog and headless checks
//!
//! `check` runs setup, baseline, scan and evaluation for one configuration and
//! reports the verdict through the exit code. With `--serial` it also saves
//! the plot of a Final scan the way the console's GOOD action does.

use clap::{Parser, Subcommand, ValueEnum};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::ExitCode;
use vswr_core::cli::{init_tracing, print_exit_codes, CliResult, ExitCodes};
use vswr_core::{
    evaluate_params, open_scanner, save_unit_plot, ConfigKey, ConsoleConfig, Evaluation, ParameterCatalog,
    PngArtifactStore, ScanParams, ScanResult, ScanSession, Serial,
};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// VSWR CLI
#[derive(Parser, Debug)]
#[command(
    name = "vswr-cli",
    version,
    about = "Catalog inspection and headless VSWR checks",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "VSWR_CONFIG")]
    config: Option<PathBuf>,

    /// Alternate parameter catalog (JSON)
    #[arg(long)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the parameter catalog, or one configuration
    Params {
        /// Configuration key (e.g. E-Dot-Final)
        key: Option<String>,
    },

    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Set up, baseline, scan and evaluate one configuration
    Check {
        /// Configuration key (e.g. E-Dot-Final)
        key: String,

        /// Scanner serial port, overriding the config file
        #[arg(short, long)]
        port: Option<String>,

        /// Baseline samples, overriding the config file
        #[arg(long)]
        samples: Option<usize>,

        /// Use the simulated scanner instead of hardware
        #[arg(long)]
        simulate: bool,

        /// Save the plot under this 5-letter serial (Final tests only)
        #[arg(long)]
        serial: Option<String>,
    },

    /// Show exit codes
    ExitCodes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(if cli.quiet { "error" } else { "warn" }, None, false);

    let result = panic::catch_unwind(AssertUnwindSafe(|| run(&cli)))
        .unwrap_or_else(|payload| CliResult::from_panic(payload.as_ref()));
    if let Some(message) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                println!("{message}");
            }
        } else {
            eprintln!("Error: {message}");
        }
    }
    result.to_exit_code()
}

fn run(cli: &Cli) -> CliResult {
    if let Commands::ExitCodes = cli.command {
        print_exit_codes();
        return CliResult::success();
    }
    if let Commands::ListPorts { detailed } = cli.command {
        return list_ports(cli, detailed);
    }

    let config = match ConsoleConfig::load(cli.config.as_deref()) {
        Ok(config) => config.with_params_file(cli.params.clone()),
        Err(e) => return e.into(),
    };
    let catalog = match config.load_catalog() {
        Ok(catalog) => catalog,
        Err(e) => return e.into(),
    };

    match &cli.command {
        Commands::Params { key } => show_params(cli, &catalog, key.as_deref()),
        Commands::Check {
            key,
            port,
            samples,
            simulate,
            serial,
        } => {
            let config = config.with_port(port.clone());
            let samples = samples.unwrap_or(config.catalog.baseline_samples);
            check(cli, &config, &catalog, key, samples, *simulate, serial.as_deref())
        }
        Commands::ListPorts { .. } | Commands::ExitCodes => CliResult::success(),
    }
}

fn list_ports(cli: &Cli, detailed: bool) -> CliResult {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => return CliResult::error(ExitCodes::ERROR, e.to_string()),
    };

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return CliResult::success();
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            print_json(&json);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }
    CliResult::success()
}

fn show_params(cli: &Cli, catalog: &ParameterCatalog, key: Option<&str>) -> CliResult {
    let entries: Vec<(ConfigKey, &ScanParams)> = match key {
        Some(key) => {
            let resolved = key
                .parse::<ConfigKey>()
                .and_then(|k| catalog.resolve(k).map(|p| (k, p)));
            match resolved {
                Ok(entry) => vec![entry],
                Err(e) => return e.into(),
            }
        }
        None => catalog
            .keys()
            .filter_map(|k| catalog.resolve(k).ok().map(|p| (k, p)))
            .collect(),
    };

    match cli.format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .filter_map(|(k, p)| Some((k.to_string(), serde_json::to_value(p).ok()?)))
                .collect();
            print_json(&map);
        }
        OutputFormat::Text => {
            for (key, params) in entries {
                println!("[{key}]");
                println!("{}", params.run_params_text());
                println!("Filename Template: {}", params.filename_template);
                println!();
            }
        }
    }
    CliResult::success()
}

fn check(
    cli: &Cli,
    config: &ConsoleConfig,
    catalog: &ParameterCatalog,
    key: &str,
    samples: usize,
    simulate: bool,
    serial: Option<&str>,
) -> CliResult {
    let (key, params) = match key.parse::<ConfigKey>().and_then(|k| catalog.resolve(k).map(|p| (k, p))) {
        Ok(entry) => entry,
        Err(e) => return e.into(),
    };
    let serial = match serial.map(Serial::parse).transpose() {
        Ok(serial) => serial,
        Err(e) => return CliResult::error(ExitCodes::INVALID_ARGS, e.to_string()),
    };
    if serial.is_some() && !key.test.saves_artifact() {
        return CliResult::error(ExitCodes::INVALID_ARGS, format!("{key} plots are not saved"));
    }

    let mut session = ScanSession::new(open_scanner(&config.serial, simulate));
    let handle = session.shutdown_handle();
    let wait = config.serial.longest_operation();
    if let Err(e) = ctrlc::set_handler(move || {
        if !handle.shutdown_within(wait) {
            tracing::error!("Interrupted while the scanner was busy");
        }
        std::process::exit(i32::from(ExitCodes::CANCELLED));
    }) {
        tracing::warn!("Ctrl-C handler not installed: {}", e);
    }

    let outcome = measure(&mut session, params, samples);
    if let Err(e) = session.shutdown() {
        tracing::error!("Scanner shutdown failed: {}", e);
    }
    let (baseline, result, evaluation) = match outcome {
        Ok(outcome) => outcome,
        Err(e) => return e.into(),
    };

    let saved = match &serial {
        Some(serial) => {
            let mut store = PngArtifactStore::default();
            match save_unit_plot(&mut store, key, params, serial, &result, &evaluation) {
                Ok(path) => Some(path),
                Err(e) => return e.into(),
            }
        }
        None => None,
    };

    if !cli.quiet {
        match cli.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "key": key.to_string(),
                "baseline_dbm": baseline,
                "passed": evaluation.passed(),
                "status": evaluation.verdict.status_text(),
                "evaluation": evaluation,
                "captured_at": result.captured_at().to_rfc3339(),
                "saved": saved,
            })),
            OutputFormat::Text => {
                print_check(key, baseline, &evaluation);
                if let Some(path) = &saved {
                    println!("Saved {}", path.display());
                }
            }
        }
    }

    if evaluation.passed() {
        CliResult::success()
    } else {
        CliResult::test_failed(evaluation.verdict.status_text())
    }
}

fn measure(
    session: &mut ScanSession,
    params: &ScanParams,
    samples: usize,
) -> Result<(f64, ScanResult, Evaluation), vswr_core::InstrumentError> {
    session.setup(params)?;
    let baseline = session.run_baseline(params, samples)?;
    let result = session.run_scan(params)?.clone();
    let evaluation = evaluate_params(&result, params);
    Ok((baseline, result, evaluation))
}

fn print_check(key: ConfigKey, baseline: f64, evaluation: &Evaluation) {
    println!("Configuration: {key}");
    println!("Baseline: {baseline:.2} dBm");
    println!("Samples in window: {}", evaluation.samples_in_window);
    if let Some(stats) = evaluation.stats {
        println!("Min VSWR: {:.2} @ {} kHz", stats.min_vswr, stats.min_freq_khz);
        println!("Start VSWR: {:.2}", stats.start_vswr);
        println!("Mid VSWR: {:.2}", stats.mid_vswr);
        println!("Max VSWR: {:.2} (limit {:.2})", stats.max_vswr, evaluation.vswr_max);
    }
    println!("{}", evaluation.verdict.status_text());
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}
