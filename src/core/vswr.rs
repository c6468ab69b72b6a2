//! VSWR conversion and pass/fail evaluation
//!
//! A scan result is an ordered list of (frequency, VSWR) samples. Evaluation
//! checks every sample inside the evaluation window against the limit and
//! collects the statistics used for artifact naming in the same pass.

use crate::core::catalog::ScanParams;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status text for a passing scan
pub const PASS_TEXT: &str = "VSWR test passed - all values within limits";
/// Status text for a failing scan
pub const FAIL_TEXT: &str = "VSWR test failed - limit exceeded";
/// Status text when the window holds no samples
pub const EMPTY_WINDOW_TEXT: &str = "VSWR test failed - no samples in evaluation window";

/// Convert return loss (dB, either sign) to VSWR
///
/// Γ = 10^(−|RL|/20), VSWR = (1 + Γ) / (1 − Γ). A total reflection yields
/// infinity.
pub fn vswr_from_return_loss(return_loss_db: f64) -> f64 {
    let gamma = 10f64.powf(-return_loss_db.abs() / 20.0);
    if gamma >= 1.0 {
        return f64::INFINITY;
    }
    (1.0 + gamma) / (1.0 - gamma)
}

/// Convert VSWR back to (negative) return loss in dB
pub fn return_loss_from_vswr(vswr: f64) -> f64 {
    if !vswr.is_finite() {
        return 0.0;
    }
    let vswr = vswr.max(1.0);
    let gamma = (vswr - 1.0) / (vswr + 1.0);
    if gamma <= 0.0 {
        return f64::NEG_INFINITY;
    }
    20.0 * gamma.log10()
}

/// Scan result construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanResultError {
    /// Frequencies are not strictly increasing
    #[error("Scan points out of order at {0} kHz")]
    OutOfOrder(u32),
}

/// One scanned sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Frequency (kHz)
    pub frequency_khz: u32,
    /// VSWR (dimensionless, >= 1)
    pub vswr: f64,
}

/// Ordered (frequency, VSWR) samples from one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    points: Vec<ScanPoint>,
    captured_at: DateTime<Local>,
}

impl ScanResult {
    /// Build a result, checking frequencies strictly increase
    pub fn new(points: Vec<ScanPoint>) -> Result<Self, ScanResultError> {
        for pair in points.windows(2) {
            if pair[1].frequency_khz <= pair[0].frequency_khz {
                return Err(ScanResultError::OutOfOrder(pair[1].frequency_khz));
            }
        }
        Ok(Self {
            points,
            captured_at: Local::now(),
        })
    }

    /// Build from `(frequency, vswr)` pairs
    pub fn from_pairs(pairs: &[(u32, f64)]) -> Result<Self, ScanResultError> {
        Self::new(
            pairs
                .iter()
                .map(|&(frequency_khz, vswr)| ScanPoint { frequency_khz, vswr })
                .collect(),
        )
    }

    /// Samples in frequency order
    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the result holds no samples
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Capture time
    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }
}

/// Evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VswrWindow {
    /// Window start (kHz, inclusive)
    pub start_khz: u32,
    /// Reference frequency for the mid statistic (kHz)
    pub mid_khz: u32,
    /// Window stop (kHz, inclusive)
    pub stop_khz: u32,
}

impl VswrWindow {
    /// Window with its reference point halfway between the edges
    pub fn new(start_khz: u32, stop_khz: u32) -> Self {
        let mid_khz = start_khz + stop_khz.saturating_sub(start_khz) / 2;
        Self {
            start_khz,
            mid_khz,
            stop_khz,
        }
    }

    /// Window described by a parameter set
    pub fn from_params(params: &ScanParams) -> Self {
        Self {
            start_khz: params.vswr_start_khz,
            mid_khz: params.vswr_mid_khz,
            stop_khz: params.vswr_stop_khz,
        }
    }

    /// Whether a frequency lies inside the window
    pub fn contains(&self, frequency_khz: u32) -> bool {
        (self.start_khz..=self.stop_khz).contains(&frequency_khz)
    }
}

/// Pass/fail outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Every in-window sample within the limit
    Pass,
    /// At least one in-window sample above the limit
    Fail,
    /// No samples in the window; counts as a failure
    EmptyWindow,
}

impl Verdict {
    /// Whether the unit passed
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// "TEST RESULTS" status text
    pub fn status_text(&self) -> &'static str {
        match self {
            Verdict::Pass => PASS_TEXT,
            Verdict::Fail => FAIL_TEXT,
            Verdict::EmptyWindow => EMPTY_WINDOW_TEXT,
        }
    }
}

/// Statistics over the in-window samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VswrStats {
    /// Frequency of the lowest VSWR (kHz)
    pub min_freq_khz: u32,
    /// Lowest VSWR
    pub min_vswr: f64,
    /// VSWR of the sample nearest the window start
    pub start_vswr: f64,
    /// VSWR of the sample nearest the window reference point
    pub mid_vswr: f64,
    /// Highest VSWR
    pub max_vswr: f64,
}

/// Verdict plus side statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Outcome
    pub verdict: Verdict,
    /// Statistics, absent when the window is empty
    pub stats: Option<VswrStats>,
    /// Number of samples inside the window
    pub samples_in_window: usize,
    /// Limit applied
    pub vswr_max: f64,
}

impl Evaluation {
    /// Whether the unit passed
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

/// Evaluate against `[window_start_khz, window_stop_khz]` with the reference
/// point halfway across the window
pub fn evaluate_vswr_range(
    result: &ScanResult,
    window_start_khz: u32,
    window_stop_khz: u32,
    vswr_max: f64,
) -> Evaluation {
    evaluate_vswr_window(result, VswrWindow::new(window_start_khz, window_stop_khz), vswr_max)
}

/// Evaluate against the window and limit of a parameter set
pub fn evaluate_params(result: &ScanResult, params: &ScanParams) -> Evaluation {
    evaluate_vswr_window(result, VswrWindow::from_params(params), params.vswr_max)
}

/// Evaluate in-window samples against `vswr_max` (inclusive)
pub fn evaluate_vswr_window(result: &ScanResult, window: VswrWindow, vswr_max: f64) -> Evaluation {
    let mut count = 0usize;
    let mut within_limit = true;
    let mut min: Option<ScanPoint> = None;
    let mut max: Option<ScanPoint> = None;
    let mut nearest_start: Option<(u32, f64)> = None;
    let mut nearest_mid: Option<(u32, f64)> = None;

    for point in result.points().iter().filter(|p| window.contains(p.frequency_khz)) {
        count += 1;
        // NaN never compares <= so it fails the unit.
        if !(point.vswr <= vswr_max) {
            within_limit = false;
        }
        // Unreadable samples stay out of the statistics.
        if point.vswr.is_nan() {
            continue;
        }
        if min.map_or(true, |m| point.vswr < m.vswr) {
            min = Some(*point);
        }
        if max.map_or(true, |m| point.vswr > m.vswr) {
            max = Some(*point);
        }
        // Strict comparison keeps the lower frequency on ties.
        let d_start = point.frequency_khz.abs_diff(window.start_khz);
        if nearest_start.map_or(true, |(d, _)| d_start < d) {
            nearest_start = Some((d_start, point.vswr));
        }
        let d_mid = point.frequency_khz.abs_diff(window.mid_khz);
        if nearest_mid.map_or(true, |(d, _)| d_mid < d) {
            nearest_mid = Some((d_mid, point.vswr));
        }
    }

    let stats = match (min, max, nearest_start, nearest_mid) {
        (Some(min), Some(max), Some((_, start_vswr)), Some((_, mid_vswr))) => Some(VswrStats {
            min_freq_khz: min.frequency_khz,
            min_vswr: min.vswr,
            start_vswr,
            mid_vswr,
            max_vswr: max.vswr,
        }),
        _ => None,
    };

    let verdict = if count == 0 {
        Verdict::EmptyWindow
    } else if within_limit {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    Evaluation {
        verdict,
        stats,
        samples_in_window: count,
        vswr_max,
    }
}
