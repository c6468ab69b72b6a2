//! Test sequencing state machine
//!
//! One explicit [`ConsoleState`] value is threaded through [`step`]. Each
//! operator [`Action`] either is disabled in the current phase (state returned
//! unchanged, no effects) or runs against the collaborators in [`Env`] and
//! returns the next state plus [`Effect`]s for the front-end to render.

use crate::core::catalog::{CatalogError, ConfigKey, DeviceType, ParameterCatalog, ScanParams, TestType};
use crate::core::chart::{save_unit_plot, ArtifactStore, VswrPlot};
use crate::core::scanner::InstrumentError;
use crate::core::serial_entry::{Serial, SerialPrompt};
use crate::core::session::ScanSession;
use crate::core::vswr::{evaluate_params, Evaluation, ScanResult, VswrWindow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Status after a successful setup
pub const SETUP_DONE_TEXT: &str = "Scanner initialized - click BASELINE to begin";

/// Passes in a row that end a continuous run
pub const CONSECUTIVE_PASS_TARGET: u32 = 5;

/// How a scan repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanMode {
    /// One scan per Scan action
    #[default]
    Single,
    /// Scan again after each result until the pass target or a stop
    Continuous,
}

impl ScanMode {
    /// The other mode
    pub fn toggled(self) -> Self {
        match self {
            ScanMode::Single => ScanMode::Continuous,
            ScanMode::Continuous => ScanMode::Single,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanMode::Single => "Single",
            ScanMode::Continuous => "Continuous",
        })
    }
}

/// Sequencing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Device or test type not chosen yet
    #[default]
    Idle,
    /// Parameters resolved and scanner set up
    Configured,
    /// Baseline captured
    Baselined,
    /// Scan evaluated; nothing to save
    Scanned,
    /// Final scan evaluated; Good is available
    ReadyToSave,
    /// Artifact written for the current scan
    Saved,
    /// Selections made but the instrument is unusable
    Faulted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "Idle",
            Phase::Configured => "Configured",
            Phase::Baselined => "Baselined",
            Phase::Scanned => "Scanned",
            Phase::ReadyToSave => "Ready to save",
            Phase::Saved => "Saved",
            Phase::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

/// Operator actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Choose the device type
    SelectDevice(DeviceType),
    /// Choose the test type
    SelectTest(TestType),
    /// Retry setup with the current selections
    Setup,
    /// Capture the baseline
    Baseline,
    /// Run a scan
    Scan,
    /// Switch between single and continuous scanning
    ToggleScanMode,
    /// Accept the unit and save its plot
    Good,
    /// Shut down and leave
    Exit,
}

/// Which actions are currently available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Enablement {
    /// Device and test toggles
    pub toggles: bool,
    /// Setup retry
    pub setup: bool,
    /// Baseline
    pub baseline: bool,
    /// Scan
    pub scan: bool,
    /// Good
    pub good: bool,
    /// Exit
    pub exit: bool,
}

impl Enablement {
    /// Actions available in `phase`
    pub fn for_phase(phase: Phase) -> Self {
        let base = Self {
            toggles: true,
            exit: true,
            ..Self::default()
        };
        match phase {
            Phase::Idle => base,
            Phase::Configured => Self { baseline: true, ..base },
            Phase::Baselined | Phase::Scanned | Phase::Saved => Self { scan: true, ..base },
            Phase::ReadyToSave => Self {
                scan: true,
                good: true,
                ..base
            },
            Phase::Faulted => Self { setup: true, ..base },
        }
    }

    /// Whether `action` is available
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::SelectDevice(_) | Action::SelectTest(_) | Action::ToggleScanMode => self.toggles,
            Action::Setup => self.setup,
            Action::Baseline => self.baseline,
            Action::Scan => self.scan,
            Action::Good => self.good,
            Action::Exit => self.exit,
        }
    }

    /// Names of the available actions
    pub fn labels(&self) -> Vec<&'static str> {
        [
            (self.toggles, "DEVICE"),
            (self.toggles, "TEST"),
            (self.toggles, "MODE"),
            (self.setup, "SETUP"),
            (self.baseline, "BASELINE"),
            (self.scan, "SCAN"),
            (self.good, "GOOD"),
            (self.exit, "EXIT"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect()
    }
}

/// Intents for the front-end
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Replace the RUN PARAMS block
    RunParams(String),
    /// Replace the TEST RESULTS text
    TestResults(String),
    /// Update which actions are available
    Enabled(Enablement),
    /// Show the scan curve
    Plot(VswrPlot),
    /// Artifact written
    Saved(PathBuf),
    /// Continuous mode wants another Scan after the pause
    Rescan,
    /// Operator-visible alert
    Alert(String),
    /// Terminate the front-end
    Exit,
}

/// Console state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConsoleState {
    /// Current phase
    pub phase: Phase,
    /// Selected device type
    pub device: Option<DeviceType>,
    /// Selected test type
    pub test: Option<TestType>,
    /// Parameters for the current selection
    pub params: Option<ScanParams>,
    /// Baseline (dBm)
    pub baseline: Option<f64>,
    /// Last scan
    pub scan: Option<ScanResult>,
    /// Verdict and statistics of the last scan
    pub evaluation: Option<Evaluation>,
    /// Serial of the saved unit
    pub serial: Option<Serial>,
    /// Artifact of the saved unit
    pub saved_path: Option<PathBuf>,
    /// RUN PARAMS text
    pub run_params: String,
    /// TEST RESULTS text
    pub test_results: String,
    /// Single or continuous scanning
    pub scan_mode: ScanMode,
    /// Passing scans in a row since the last fail, selection or save
    pub consecutive_passes: u32,
    /// Exit has run
    pub exited: bool,
}

impl ConsoleState {
    /// Fresh state
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected configuration, once both toggles are set
    pub fn config_key(&self) -> Option<ConfigKey> {
        Some(ConfigKey::new(self.device?, self.test?))
    }

    /// Available actions
    pub fn enabled(&self) -> Enablement {
        Enablement::for_phase(self.phase)
    }

    fn clear_results(&mut self) {
        self.baseline = None;
        self.scan = None;
        self.evaluation = None;
        self.serial = None;
        self.saved_path = None;
        self.consecutive_passes = 0;
        self.test_results.clear();
    }
}

/// Collaborators a transition may call into
pub struct Env<'a> {
    /// Parameter table
    pub catalog: &'a ParameterCatalog,
    /// Scanner owner
    pub session: &'a mut ScanSession,
    /// Modal serial entry
    pub prompt: &'a mut dyn SerialPrompt,
    /// Artifact destination
    pub store: &'a mut dyn ArtifactStore,
    /// Baseline sample count
    pub baseline_samples: usize,
}

/// Result of one step
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Next state
    pub state: ConsoleState,
    /// Front-end intents, in order
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: ConsoleState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }
}

/// Apply one operator action
pub fn step(state: ConsoleState, action: Action, env: &mut Env<'_>) -> Transition {
    if state.exited || !state.enabled().allows(action) {
        tracing::debug!("{:?} ignored in phase {}", action, state.phase);
        return Transition::unchanged(state);
    }

    let from = state.phase;
    let transition = match action {
        Action::SelectDevice(device) => {
            let test = state.test.map(|test| test_for_device(env.catalog, device, test));
            select(state, Some(device), test, env)
        }
        Action::SelectTest(test) => select(state, None, Some(test), env),
        Action::Setup => {
            let (device, test) = (state.device, state.test);
            select(state, device, test, env)
        }
        Action::Baseline => baseline(state, env),
        Action::Scan => scan(state, env),
        Action::ToggleScanMode => toggle_scan_mode(state),
        Action::Good => save(state, env),
        Action::Exit => exit(state, env),
    };
    tracing::debug!("{:?}: {} -> {}", action, from, transition.state.phase);
    transition
}

/// Test type to keep when switching to `device`; falls back to Element when
/// the device has no entry for the current test
fn test_for_device(catalog: &ParameterCatalog, device: DeviceType, test: TestType) -> TestType {
    if test == TestType::Element {
        return test;
    }
    match catalog.resolve(ConfigKey::new(device, test)) {
        Err(CatalogError::UnknownConfiguration(_)) => {
            tracing::info!("{} has no {} test; selecting {}", device, test, TestType::Element);
            TestType::Element
        }
        _ => test,
    }
}

fn toggle_scan_mode(state: ConsoleState) -> Transition {
    let mut next = state;
    next.scan_mode = next.scan_mode.toggled();
    tracing::info!("Scan mode {}", next.scan_mode);
    let mut effects = Vec::new();
    if next.scan_mode == ScanMode::Continuous && next.enabled().scan {
        effects.push(Effect::Rescan);
    }
    with_status(next, effects)
}

fn select(
    state: ConsoleState,
    device: Option<DeviceType>,
    test: Option<TestType>,
    env: &mut Env<'_>,
) -> Transition {
    let device = device.or(state.device);
    let test = test.or(state.test);

    let Some((device, test)) = device.zip(test) else {
        let mut next = state;
        next.device = device;
        next.test = test;
        next.phase = Phase::Idle;
        next.params = None;
        next.clear_results();
        next.run_params.clear();
        env.session.clear_results();
        return with_status(next, Vec::new());
    };

    let key = ConfigKey::new(device, test);
    let params = match env.catalog.resolve(key) {
        Ok(params) => params.clone(),
        Err(e @ CatalogError::UnknownConfiguration(_)) => {
            tracing::warn!("{}", e);
            return Transition {
                state,
                effects: vec![Effect::Alert(e.to_string())],
            };
        }
        Err(e) => {
            tracing::error!("Catalog lookup for {} failed: {}", key, e);
            return Transition {
                state,
                effects: vec![Effect::Alert(e.to_string())],
            };
        }
    };

    let mut next = state;
    next.device = Some(device);
    next.test = Some(test);
    next.clear_results();
    next.run_params = params.run_params_text();

    let mut effects = Vec::new();
    match env.session.setup(&params) {
        Ok(()) => {
            tracing::info!("{} configured on {}", key, env.session.describe());
            next.phase = Phase::Configured;
            next.test_results = SETUP_DONE_TEXT.to_string();
        }
        Err(e) => {
            tracing::error!("Setup for {} failed: {}", key, e);
            next.phase = Phase::Faulted;
            next.test_results = fault_text(&e);
            effects.push(Effect::Alert(format!("Scanner setup failed: {e}")));
        }
    }
    next.params = Some(params);
    with_status(next, effects)
}

fn baseline(state: ConsoleState, env: &mut Env<'_>) -> Transition {
    let Some(params) = state.params.clone() else {
        return Transition::unchanged(state);
    };
    let mut next = state;
    match env.session.run_baseline(&params, env.baseline_samples) {
        Ok(level) => {
            next.baseline = Some(level);
            next.phase = Phase::Baselined;
            next.test_results = format!("Baseline measurement complete ({level:.2} dBm) - click SCAN to proceed");
            with_status(next, Vec::new())
        }
        Err(e) => fault(next, &e),
    }
}

fn scan(state: ConsoleState, env: &mut Env<'_>) -> Transition {
    let (Some(params), Some(key)) = (state.params.clone(), state.config_key()) else {
        return Transition::unchanged(state);
    };
    let mut next = state;
    next.serial = None;
    next.saved_path = None;

    let result = match env.session.run_scan(&params) {
        Ok(result) => result.clone(),
        Err(e) => return fault(next, &e),
    };
    let evaluation = evaluate_params(&result, &params);
    tracing::info!(
        "{}: {} ({} samples in window, limit {})",
        key,
        evaluation.verdict.status_text(),
        evaluation.samples_in_window,
        evaluation.vswr_max
    );

    let plot = VswrPlot::new(
        key.to_string(),
        &result,
        VswrWindow::from_params(&params),
        params.vswr_max,
        evaluation.verdict,
    );
    next.phase = if key.test.saves_artifact() && evaluation.stats.is_some() {
        Phase::ReadyToSave
    } else {
        Phase::Scanned
    };
    next.consecutive_passes = if evaluation.passed() {
        next.consecutive_passes.saturating_add(1)
    } else {
        0
    };
    let target_reached = next.consecutive_passes >= CONSECUTIVE_PASS_TARGET;
    next.test_results = match next.consecutive_passes {
        0 => evaluation.verdict.status_text().to_string(),
        n if target_reached && next.phase == Phase::ReadyToSave => format!(
            "{} - {n} Consecutive Passes - Do you want to save the plot?",
            evaluation.verdict.status_text()
        ),
        n => format!("{} - {n} Consecutive Passes", evaluation.verdict.status_text()),
    };
    next.scan = Some(result);
    next.evaluation = Some(evaluation);

    let mut effects = vec![Effect::Plot(plot)];
    if next.scan_mode == ScanMode::Continuous {
        if target_reached {
            tracing::info!("{} consecutive passes; continuous scanning stopped", next.consecutive_passes);
        } else {
            effects.push(Effect::Rescan);
        }
    }
    with_status(next, effects)
}

fn save(state: ConsoleState, env: &mut Env<'_>) -> Transition {
    let (Some(params), Some(key), Some(result), Some(evaluation)) =
        (state.params.clone(), state.config_key(), state.scan.clone(), state.evaluation)
    else {
        return Transition::unchanged(state);
    };

    let serial = match env.prompt.prompt_serial() {
        Ok(serial) => serial,
        Err(e) => {
            tracing::info!("{}", e);
            return Transition {
                state,
                effects: vec![Effect::Alert(e.to_string())],
            };
        }
    };

    match save_unit_plot(&mut *env.store, key, &params, &serial, &result, &evaluation) {
        Ok(path) => {
            tracing::info!("{} saved for {}", path.display(), serial);
            let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let mut next = state;
            next.test_results = format!("{stem} saved for {serial}");
            next.serial = Some(serial);
            next.saved_path = Some(path.clone());
            next.phase = Phase::Saved;
            next.consecutive_passes = 0;
            let mut effects = vec![Effect::Saved(path)];
            if next.scan_mode == ScanMode::Continuous {
                effects.push(Effect::Rescan);
            }
            with_status(next, effects)
        }
        Err(e) => {
            tracing::error!("Saving {} for {} failed: {}", key, serial, e);
            Transition {
                state,
                effects: vec![Effect::Alert(e.to_string())],
            }
        }
    }
}

fn exit(state: ConsoleState, env: &mut Env<'_>) -> Transition {
    if let Err(e) = env.session.shutdown() {
        tracing::error!("Scanner shutdown failed: {}", e);
    }
    let mut next = state;
    next.exited = true;
    Transition {
        state: next,
        effects: vec![Effect::Exit],
    }
}

fn fault(state: ConsoleState, error: &InstrumentError) -> Transition {
    tracing::error!("Instrument error: {}", error);
    let mut next = state;
    next.clear_results();
    next.phase = Phase::Faulted;
    next.test_results = fault_text(error);
    with_status(next, vec![Effect::Alert(error.to_string())])
}

fn fault_text(error: &InstrumentError) -> String {
    format!("Instrument error: {error} - select SETUP to retry")
}

/// Append the status effects every visible change carries
fn with_status(state: ConsoleState, mut effects: Vec<Effect>) -> Transition {
    effects.push(Effect::RunParams(state.run_params.clone()));
    effects.push(Effect::TestResults(state.test_results.clone()));
    effects.push(Effect::Enabled(state.enabled()));
    Transition { state, effects }
}
