//! VSWR plot and artifact persistence
//!
//! Provides:
//! - The plot model handed to front-ends after a scan
//! - A text preview for terminals
//! - PNG rasterisation and the artifact store that writes it

pub mod export;
mod glyphs;

pub use export::{PlotStyle, PngRenderer};

use crate::core::catalog::{ConfigKey, ScanParams};
use crate::core::filename::{compose, TemplateError};
use crate::core::serial_entry::Serial;
use crate::core::vswr::{Evaluation, ScanResult, Verdict, VswrWindow};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Glyphs for the text preview, lowest first
const SPARK_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Curve with its limit markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VswrPlot {
    /// Plot title
    pub title: String,
    /// (frequency kHz, VSWR) samples
    pub curve: Vec<(u32, f64)>,
    /// Limit line
    pub vswr_max: f64,
    /// Evaluation window markers
    pub window: VswrWindow,
    /// Outcome shading
    pub verdict: Verdict,
    /// When the scan was taken
    pub captured_at: DateTime<Local>,
}

impl VswrPlot {
    /// Plot of a scan result
    pub fn new(title: impl Into<String>, result: &ScanResult, window: VswrWindow, vswr_max: f64, verdict: Verdict) -> Self {
        Self {
            title: title.into(),
            curve: result
                .points()
                .iter()
                .map(|p| (p.frequency_khz, p.vswr))
                .collect(),
            vswr_max,
            window,
            verdict,
            captured_at: result.captured_at(),
        }
    }

    /// Frequency span of the curve
    pub fn x_range(&self) -> Option<(u32, u32)> {
        Some((self.curve.first()?.0, self.curve.last()?.0))
    }

    /// Upper edge of the VSWR axis (the axis starts at 1.0)
    pub fn y_max(&self) -> f64 {
        if self.vswr_max.is_finite() {
            2.0f64.max(self.vswr_max * 1.1)
        } else {
            2.0
        }
    }

    /// One-line preview: one glyph per column, `!` above the limit
    pub fn sparkline(&self, width: usize) -> String {
        if self.curve.is_empty() || width == 0 {
            return String::new();
        }
        let y_max = self.y_max();
        let columns = width.min(self.curve.len());
        (0..columns)
            .map(|col| {
                // Worst sample in the bucket so spikes stay visible.
                let from = col * self.curve.len() / columns;
                let to = ((col + 1) * self.curve.len() / columns).max(from + 1);
                let worst = self.curve[from..to]
                    .iter()
                    .map(|(_, v)| *v)
                    .fold(f64::NEG_INFINITY, f64::max);
                if !(worst <= self.vswr_max) {
                    return '!';
                }
                let level = ((worst - 1.0) / (y_max - 1.0)).clamp(0.0, 1.0);
                SPARK_GLYPHS[(level * (SPARK_GLYPHS.len() - 1) as f64).round() as usize]
            })
            .collect()
    }
}

/// Artifact persistence errors
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Save directory could not be created
    #[error("Cannot create {path}: {source}")]
    CreateDir {
        /// Directory
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// Image encoding or write failed
    #[error("Cannot write {path}: {source}")]
    Write {
        /// Target file
        path: PathBuf,
        /// Cause
        source: image::ImageError,
    },

    /// Plot has nothing to draw
    #[error("Plot has no data")]
    EmptyPlot,
}

/// Failure to save an accepted unit's plot
#[derive(Error, Debug)]
pub enum SaveError {
    /// File name could not be composed
    #[error("Cannot name plot: {0}")]
    Name(#[from] TemplateError),
    /// Store rejected the plot
    #[error("Save failed: {0}")]
    Store(#[from] ArtifactError),
}

/// Name the plot of `serial` from its statistics and write it to the
/// configuration's save directory; the title is `"{serial} {key}"`
pub fn save_unit_plot(
    store: &mut dyn ArtifactStore,
    key: ConfigKey,
    params: &ScanParams,
    serial: &Serial,
    result: &ScanResult,
    evaluation: &Evaluation,
) -> Result<PathBuf, SaveError> {
    let stem = compose(&params.filename_template, Some(serial), evaluation.stats.as_ref())?;
    let plot = VswrPlot::new(
        format!("{serial} {key}"),
        result,
        VswrWindow::from_params(params),
        params.vswr_max,
        evaluation.verdict,
    );
    Ok(store.write_plot(&params.file_save_path, &stem, &plot)?)
}

/// Destination for plot artifacts
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactStore {
    /// Write `plot` as `{dir}/{stem}.png`, creating `dir`; returns the file path
    fn write_plot(&mut self, dir: &Path, stem: &str, plot: &VswrPlot) -> Result<PathBuf, ArtifactError>;
}

/// Writes PNG files to the local filesystem
#[derive(Debug, Clone, Default)]
pub struct PngArtifactStore {
    renderer: PngRenderer,
}

impl PngArtifactStore {
    /// Store with a custom renderer
    pub fn new(renderer: PngRenderer) -> Self {
        Self { renderer }
    }
}

impl ArtifactStore for PngArtifactStore {
    fn write_plot(&mut self, dir: &Path, stem: &str, plot: &VswrPlot) -> Result<PathBuf, ArtifactError> {
        std::fs::create_dir_all(dir).map_err(|source| ArtifactError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{stem}.png"));
        let image = self.renderer.render(plot).ok_or(ArtifactError::EmptyPlot)?;
        image.save(&path).map_err(|source| ArtifactError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Plot saved to {}", path.display());
        Ok(path)
    }
}
