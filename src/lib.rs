//! # VSWR Console Core Library
//!
//! Drives a frequency-domain VSWR test fixture:
//! - Parameter catalog per device and test type
//! - Scanner capability with a TPI serial driver and a simulated scanner
//! - Baseline and scan sequencing with pass/fail evaluation
//! - Operator state machine gating the available actions
//! - Plot artifacts named from the unit serial and scan statistics
//!
//! ## Example
//!
//! ```rust,no_run
//! use vswr_core::{evaluate_params, ConfigKey, ParameterCatalog, ScanSession, SimulatedScanner};
//!
//! fn main() -> anyhow::Result<()> {
//!     let catalog = ParameterCatalog::builtin()?;
//!     let params = catalog.resolve("E-Dot-Final".parse::<ConfigKey>()?)?;
//!
//!     let mut session = ScanSession::new(Box::new(SimulatedScanner::default()));
//!     session.setup(params)?;
//!     session.run_baseline(params, 10)?;
//!     let result = session.run_scan(params)?.clone();
//!     println!("{}", evaluate_params(&result, params).verdict.status_text());
//!
//!     session.shutdown()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{ConfigError, ConsoleConfig};
pub use crate::core::catalog::{CatalogError, ConfigKey, DeviceType, ParameterCatalog, ScanParams, TestType};
pub use crate::core::chart::{save_unit_plot, ArtifactError, ArtifactStore, PngArtifactStore, SaveError, VswrPlot};
pub use crate::core::filename::{compose, TemplateError};
pub use crate::core::scanner::{
    open_scanner, InstrumentError, Scanner, SimulatedScanner, SweepConfig, TpiScanner, TpiSettings, VswrProfile,
};
pub use crate::core::serial_entry::{Cancelled, Serial, SerialEntry, SerialError, SerialPrompt};
pub use crate::core::session::{ScanSession, ShutdownHandle};
pub use crate::core::state_machine::{
    step, Action, ConsoleState, Effect, Enablement, Env, Phase, ScanMode, Transition, CONSECUTIVE_PASS_TARGET,
};
pub use crate::core::vswr::{
    evaluate_params, evaluate_vswr_range, evaluate_vswr_window, Evaluation, ScanPoint, ScanResult, Verdict,
    VswrStats, VswrWindow,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
