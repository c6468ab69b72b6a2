//! Interactive operator console
//!
//! Reads one command per line, feeds it to the state machine and renders the
//! resulting effects as text. The serial prompt switches the terminal to raw
//! mode for keystroke entry; when stdin is not a terminal it reads a line
//! from the same input instead.

use crate::core::catalog::{DeviceType, ParameterCatalog, TestType};
use crate::core::chart::{ArtifactStore, VswrPlot};
use crate::core::serial_entry::{Cancelled, EntryEvent, Key, Serial, SerialEntry, SerialPrompt};
use crate::core::session::ScanSession;
use crate::core::state_machine::{step, Action, ConsoleState, Effect, Env};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, queue, style::Print};
use std::io::{self, BufRead, Write};
use std::time::Duration;

const SERIAL_PROMPT: &str = "Enter 5-letter serial (Esc cancels): ";

/// Pause between continuous scans
const RESCAN_PAUSE: Duration = Duration::from_millis(100);

/// Continuous scans allowed without a keyboard to stop them
const DEFAULT_RESCAN_LIMIT: usize = 100;

const HELP: &str = "\
Commands:
  dot | sq | device     select E-Dot, E-Sq, or toggle the device type
  element | wet | final select the test type
  setup                 retry scanner setup after a fault
  baseline              capture the baseline
  scan                  scan and evaluate
  mode                  toggle single/continuous scanning (any key stops a run)
  good                  accept the unit and save its plot (Final)
  status                show the current state
  help                  show this text
  exit                  shut down the scanner and quit";

/// Parsed console input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// State machine action
    Action(Action),
    /// Flip the device type
    ToggleDevice,
    /// Print state
    Status,
    /// Print help
    Help,
}

/// Parse one input line; `None` for unrecognised input
pub fn parse_command(line: &str) -> Option<Command> {
    let word = line.trim().to_ascii_lowercase();
    let command = match word.as_str() {
        "device" | "d" => Command::ToggleDevice,
        "setup" => Command::Action(Action::Setup),
        "baseline" | "b" => Command::Action(Action::Baseline),
        "scan" | "s" => Command::Action(Action::Scan),
        "mode" | "m" => Command::Action(Action::ToggleScanMode),
        "good" | "g" => Command::Action(Action::Good),
        "exit" | "quit" | "q" => Command::Action(Action::Exit),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        other => {
            if let Ok(device) = other.parse::<DeviceType>() {
                Command::Action(Action::SelectDevice(device))
            } else if let Ok(test) = other.parse::<TestType>() {
                Command::Action(Action::SelectTest(test))
            } else {
                return None;
            }
        }
    };
    Some(command)
}

/// Line-driven console
pub struct Console<R, W> {
    input: R,
    output: W,
    keystroke_entry: bool,
    preview_width: usize,
    rescan_pause: Duration,
    rescan_limit: usize,
    state: ConsoleState,
}

impl<R: BufRead, W: Write> Console<R, W> {
    /// Console over `input`/`output`; the serial prompt reads lines from `input`
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            keystroke_entry: false,
            preview_width: 60,
            rescan_pause: RESCAN_PAUSE,
            rescan_limit: DEFAULT_RESCAN_LIMIT,
            state: ConsoleState::new(),
        }
    }

    /// Use raw-mode keystroke entry for the serial prompt
    #[must_use]
    pub fn keystroke_entry(mut self, enabled: bool) -> Self {
        self.keystroke_entry = enabled;
        self
    }

    /// Pause between continuous scans
    #[must_use]
    pub fn rescan_pause(mut self, pause: Duration) -> Self {
        self.rescan_pause = pause;
        self
    }

    /// Continuous scans before line mode falls back to single scanning
    #[must_use]
    pub fn rescan_limit(mut self, limit: usize) -> Self {
        self.rescan_limit = limit;
        self
    }

    /// Current state
    pub fn state(&self) -> &ConsoleState {
        &self.state
    }

    /// Run until Exit or end of input; end of input runs Exit
    pub fn run(
        &mut self,
        catalog: &ParameterCatalog,
        session: &mut ScanSession,
        store: &mut dyn ArtifactStore,
        baseline_samples: usize,
    ) -> io::Result<ConsoleState> {
        writeln!(self.output, "VSWR test console - {}", session.describe())?;
        writeln!(self.output, "{HELP}")?;
        self.render_enabled()?;

        let mut line = String::new();
        let mut rescan = false;
        let mut rescans = 0;
        while !self.state.exited {
            let action = if std::mem::take(&mut rescan) {
                if self.continuous_stopped(rescans)? {
                    rescans = 0;
                    writeln!(self.output, "Continuous scanning stopped")?;
                    Action::ToggleScanMode
                } else {
                    rescans += 1;
                    Action::Scan
                }
            } else {
                rescans = 0;
                match self.read_action(&mut line)? {
                    Some(action) => action,
                    None => continue,
                }
            };

            if !self.state.enabled().allows(action) {
                writeln!(self.output, "{action:?} is not available now")?;
                continue;
            }

            let state = std::mem::take(&mut self.state);
            let transition = if self.keystroke_entry {
                let mut prompt = KeystrokePrompt;
                let mut env = Env {
                    catalog,
                    session: &mut *session,
                    prompt: &mut prompt,
                    store: &mut *store,
                    baseline_samples,
                };
                step(state, action, &mut env)
            } else {
                let mut prompt = LinePrompt::new(&mut self.input, &mut self.output);
                let mut env = Env {
                    catalog,
                    session: &mut *session,
                    prompt: &mut prompt,
                    store: &mut *store,
                    baseline_samples,
                };
                step(state, action, &mut env)
            };
            self.state = transition.state;
            rescan = transition.effects.contains(&Effect::Rescan);
            for effect in &transition.effects {
                self.render(effect)?;
            }
        }
        Ok(self.state.clone())
    }

    /// Next operator action from the input; `None` when the line needs no step
    fn read_action(&mut self, line: &mut String) -> io::Result<Option<Action>> {
        write!(self.output, "> ")?;
        self.output.flush()?;
        line.clear();
        if self.input.read_line(line)? == 0 {
            writeln!(self.output)?;
            return Ok(Some(Action::Exit));
        }
        let action = match parse_command(line) {
            Some(Command::Action(action)) => action,
            Some(Command::ToggleDevice) => {
                Action::SelectDevice(self.state.device.map_or(DeviceType::EDot, |d| d.toggled()))
            }
            Some(Command::Status) => {
                self.render_status()?;
                return Ok(None);
            }
            Some(Command::Help) => {
                writeln!(self.output, "{HELP}")?;
                return Ok(None);
            }
            None => {
                if !line.trim().is_empty() {
                    writeln!(self.output, "Unknown command: {} (type help)", line.trim())?;
                }
                return Ok(None);
            }
        };
        Ok(Some(action))
    }

    /// Wait out the rescan pause; true when the continuous run should end
    fn continuous_stopped(&mut self, rescans: usize) -> io::Result<bool> {
        if self.keystroke_entry {
            let _raw = RawModeGuard::enable()?;
            if event::poll(self.rescan_pause)? {
                // Any key ends the run.
                event::read()?;
                return Ok(true);
            }
            return Ok(false);
        }
        std::thread::sleep(self.rescan_pause);
        Ok(rescans >= self.rescan_limit)
    }

    fn render(&mut self, effect: &Effect) -> io::Result<()> {
        match effect {
            Effect::RunParams(text) if text.is_empty() => Ok(()),
            Effect::RunParams(text) => writeln!(self.output, "RUN PARAMS\n{text}"),
            Effect::TestResults(text) => writeln!(self.output, "TEST RESULTS: {text}"),
            Effect::Enabled(_) => self.render_enabled(),
            Effect::Plot(plot) => self.render_plot(plot),
            Effect::Saved(path) => writeln!(self.output, "Saved {}", path.display()),
            Effect::Rescan => Ok(()),
            Effect::Alert(message) => writeln!(self.output, "!! {message}"),
            Effect::Exit => writeln!(self.output, "Scanner released. Goodbye."),
        }
    }

    fn render_plot(&mut self, plot: &VswrPlot) -> io::Result<()> {
        let Some((from, to)) = plot.x_range() else {
            return Ok(());
        };
        writeln!(
            self.output,
            "{} [{} - {} kHz, limit {:.2}] {}",
            plot.title,
            from,
            to,
            plot.vswr_max,
            plot.captured_at.format("%H:%M:%S")
        )?;
        writeln!(self.output, "  {}", plot.sparkline(self.preview_width))
    }

    fn render_enabled(&mut self) -> io::Result<()> {
        let labels = self.state.enabled().labels();
        writeln!(self.output, "[{}] available: {}", self.state.phase, labels.join(" "))
    }

    fn render_status(&mut self) -> io::Result<()> {
        let device = self.state.device.map_or("-", |d| d.label());
        let test = self.state.test.map_or("-", |t| t.label());
        writeln!(
            self.output,
            "Device: {device}  Test: {test}  Phase: {}  Scan mode: {}",
            self.state.phase, self.state.scan_mode
        )?;
        if let Some(baseline) = self.state.baseline {
            writeln!(self.output, "Baseline: {baseline:.2} dBm")?;
        }
        if let Some(stats) = self.state.evaluation.and_then(|e| e.stats) {
            writeln!(
                self.output,
                "Min {:.2} @ {} kHz, start {:.2}, mid {:.2}, max {:.2}",
                stats.min_vswr, stats.min_freq_khz, stats.start_vswr, stats.mid_vswr, stats.max_vswr
            )?;
        }
        if !self.state.test_results.is_empty() {
            writeln!(self.output, "TEST RESULTS: {}", self.state.test_results)?;
        }
        self.render_enabled()
    }
}

/// Serial prompt reading whole lines
pub struct LinePrompt<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
}

impl<'a, R: BufRead, W: Write> LinePrompt<'a, R, W> {
    /// Prompt over borrowed streams
    pub fn new(input: &'a mut R, output: &'a mut W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self) -> io::Result<Option<Serial>> {
        let mut line = String::new();
        loop {
            write!(self.output, "{SERIAL_PROMPT}")?;
            self.output.flush()?;
            line.clear();
            if self.input.read_line(&mut line)? == 0 || line.trim().is_empty() {
                return Ok(None);
            }
            match Serial::parse(&line) {
                Ok(serial) => return Ok(Some(serial)),
                Err(e) => writeln!(self.output, "{e}")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> SerialPrompt for LinePrompt<'_, R, W> {
    fn prompt_serial(&mut self) -> Result<Serial, Cancelled> {
        match self.ask() {
            Ok(Some(serial)) => Ok(serial),
            Ok(None) => Err(Cancelled),
            Err(e) => {
                tracing::warn!("Serial prompt failed: {}", e);
                Err(Cancelled)
            }
        }
    }
}

/// Raw mode for the lifetime of the guard
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::error!("Failed to leave raw mode: {}", e);
        }
    }
}

/// Keystroke-validated prompt on the controlling terminal
pub struct KeystrokePrompt;

impl KeystrokePrompt {
    fn read_serial(out: &mut impl Write) -> io::Result<Option<Serial>> {
        let _raw = RawModeGuard::enable()?;
        let mut entry = SerialEntry::new();
        let mut note = String::new();

        loop {
            queue!(
                out,
                cursor::MoveToColumn(0),
                terminal::Clear(ClearType::CurrentLine),
                Print(SERIAL_PROMPT),
                Print(entry.text()),
                Print(&note)
            )?;
            out.flush()?;

            let Event::Key(KeyEvent {
                code, kind, modifiers, ..
            }) = event::read()?
            else {
                continue;
            };
            if kind != KeyEventKind::Press {
                continue;
            }
            let key = match code {
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Key::Escape,
                KeyCode::Char(c) => Key::Char(c),
                KeyCode::Backspace => Key::Backspace,
                KeyCode::Enter => Key::Enter,
                KeyCode::Esc => Key::Escape,
                _ => continue,
            };

            note.clear();
            match entry.handle(key) {
                EntryEvent::Accepted(_) | EntryEvent::Ignored => {}
                EntryEvent::Rejected(e) => note = format!("  ({e})"),
                EntryEvent::Committed(serial) => {
                    queue!(out, Print("\r\n"))?;
                    out.flush()?;
                    return Ok(Some(serial));
                }
                EntryEvent::Cancelled => {
                    queue!(out, Print("\r\n"))?;
                    out.flush()?;
                    return Ok(None);
                }
            }
        }
    }
}

impl SerialPrompt for KeystrokePrompt {
    fn prompt_serial(&mut self) -> Result<Serial, Cancelled> {
        match Self::read_serial(&mut io::stdout()) {
            Ok(Some(serial)) => Ok(serial),
            Ok(None) => Err(Cancelled),
            Err(e) => {
                tracing::warn!("Keystroke entry failed: {}", e);
                Err(Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chart::PngArtifactStore;
    use crate::core::scanner::{SimulatedScanner, VswrProfile};
    use crate::core::state_machine::Phase;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(" Dot \n"), Some(Command::Action(Action::SelectDevice(DeviceType::EDot))));
        assert_eq!(parse_command("e-sq"), Some(Command::Action(Action::SelectDevice(DeviceType::ESq))));
        assert_eq!(parse_command("FINAL"), Some(Command::Action(Action::SelectTest(TestType::Final))));
        assert_eq!(parse_command("device"), Some(Command::ToggleDevice));
        assert_eq!(parse_command("q"), Some(Command::Action(Action::Exit)));
        assert_eq!(parse_command("mode"), Some(Command::Action(Action::ToggleScanMode)));
        assert_eq!(parse_command("launch"), None);
    }

    #[test]
    fn test_line_prompt_retries_until_valid() {
        let mut input = io::Cursor::new(b"ab1\nabcde\n".to_vec());
        let mut output = Vec::new();
        let serial = LinePrompt::new(&mut input, &mut output).prompt_serial().unwrap();
        assert_eq!(serial.as_str(), "ABCDE");
        assert!(String::from_utf8(output).unwrap().contains("only contain letters"));

        let mut input = io::Cursor::new(b"\n".to_vec());
        let mut output = Vec::new();
        assert_eq!(LinePrompt::new(&mut input, &mut output).prompt_serial(), Err(Cancelled));
    }

    #[test]
    fn test_console_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut json: serde_json::Value = serde_json::from_str(include_str!("../../config/params.json")).unwrap();
        for entry in json.as_object_mut().unwrap().values_mut() {
            let folder = dir.path().join(entry["file_save_path"].as_str().unwrap());
            entry["file_save_path"] = folder.to_string_lossy().into_owned().into();
        }
        let catalog = ParameterCatalog::from_json_str(&json.to_string()).unwrap();
        let mut session = ScanSession::new(Box::new(SimulatedScanner::new(VswrProfile::Flat(1.3))));
        let mut store = PngArtifactStore::default();

        let script = "dot\nfinal\nbogus\ngood\nbaseline\nscan\ngood\nabcde\nstatus\n";
        let mut output = Vec::new();
        let mut console = Console::new(io::Cursor::new(script.as_bytes().to_vec()), &mut output);
        let state = console.run(&catalog, &mut session, &mut store, 2).unwrap();

        assert!(state.exited);
        assert_eq!(state.phase, Phase::Saved);
        let saved = state.saved_path.unwrap();
        assert!(saved.exists());
        let name = saved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("E-Dot-FINAL_ABCDE_"));

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("RUN PARAMS"));
        assert!(text.contains("Unknown command: bogus"));
        assert!(text.contains("Good is not available now"));
        assert!(text.contains("VSWR test passed - all values within limits"));
        assert!(text.contains("Scanner released"));
    }

    fn catalog_in(dir: &std::path::Path) -> ParameterCatalog {
        let mut json: serde_json::Value = serde_json::from_str(include_str!("../../config/params.json")).unwrap();
        for entry in json.as_object_mut().unwrap().values_mut() {
            let folder = dir.join(entry["file_save_path"].as_str().unwrap());
            entry["file_save_path"] = folder.to_string_lossy().into_owned().into();
        }
        ParameterCatalog::from_json_str(&json.to_string()).unwrap()
    }

    #[test]
    fn test_continuous_run_stops_and_resumes_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path());
        let mut session = ScanSession::new(Box::new(SimulatedScanner::new(VswrProfile::Flat(1.3))));
        let mut store = PngArtifactStore::default();

        let script = "dot\nfinal\nbaseline\nmode\ngood\nabcde\n";
        let mut output = Vec::new();
        let mut console = Console::new(io::Cursor::new(script.as_bytes().to_vec()), &mut output)
            .rescan_pause(Duration::ZERO);
        let state = console.run(&catalog, &mut session, &mut store, 2).unwrap();

        // Five passes, save, then five more after the run resumes.
        assert_eq!(state.phase, Phase::ReadyToSave);
        assert_eq!(state.consecutive_passes, 5);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches("5 Consecutive Passes - Do you want to save the plot?").count(), 2);
        assert_eq!(text.matches("TEST RESULTS: VSWR test passed").count(), 10);
        assert!(text.contains("Saved "));
    }

    #[test]
    fn test_line_mode_caps_continuous_failures() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path());
        let mut session = ScanSession::new(Box::new(SimulatedScanner::new(VswrProfile::Flat(1.9))));
        let mut store = PngArtifactStore::default();

        let script = "dot\nfinal\nbaseline\nmode\nstatus\n";
        let mut output = Vec::new();
        let mut console = Console::new(io::Cursor::new(script.as_bytes().to_vec()), &mut output)
            .rescan_pause(Duration::ZERO)
            .rescan_limit(3);
        let state = console.run(&catalog, &mut session, &mut store, 2).unwrap();

        assert_eq!(state.scan_mode, crate::core::state_machine::ScanMode::Single);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches("E-Dot-Final [").count(), 3);
        assert!(text.contains("Continuous scanning stopped"));
        assert!(text.contains("Scan mode: Single"));
    }
}
