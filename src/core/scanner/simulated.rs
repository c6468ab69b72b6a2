//! Simulated scanner
//!
//! Synthesises sweeps from a VSWR profile so the console can run without
//! hardware. Readings are `open_level + return_loss(vswr)` so the usual
//! baseline correction recovers the profile.

use super::{InstrumentError, Scanner, SweepConfig};
use crate::core::vswr::return_loss_from_vswr;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Deepest return loss the simulated detector reports (dB)
const NOISE_FLOOR_DB: f64 = -60.0;

/// Shape of the simulated VSWR curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VswrProfile {
    /// Parabolic dip centred on the sweep
    Resonant {
        /// VSWR at the centre frequency
        min_vswr: f64,
        /// VSWR at the sweep edges
        edge_vswr: f64,
    },
    /// Constant VSWR
    Flat(f64),
    /// Constant base with one bad point
    Spike {
        /// VSWR away from the spike
        base: f64,
        /// Spike frequency (kHz); the nearest point takes the peak
        at_khz: u32,
        /// VSWR at the spike
        peak: f64,
    },
}

impl VswrProfile {
    /// VSWR at `frequency_khz` for a sweep over `config`
    pub fn vswr_at(&self, config: &SweepConfig, frequency_khz: u32) -> f64 {
        match *self {
            VswrProfile::Resonant { min_vswr, edge_vswr } => {
                let centre = f64::from(config.start_khz) + f64::from(config.stop_khz - config.start_khz) / 2.0;
                let half_span = (f64::from(config.stop_khz - config.start_khz) / 2.0).max(1.0);
                let x = (f64::from(frequency_khz) - centre) / half_span;
                min_vswr + (edge_vswr - min_vswr) * x * x
            }
            VswrProfile::Flat(vswr) => vswr,
            VswrProfile::Spike { base, at_khz, peak } => {
                if frequency_khz.abs_diff(at_khz) * 2 < config.step_khz.max(1) {
                    peak
                } else {
                    base
                }
            }
        }
    }
}

impl Default for VswrProfile {
    fn default() -> Self {
        VswrProfile::Resonant {
            min_vswr: 1.1,
            edge_vswr: 2.2,
        }
    }
}

/// Scanner backed by a [`VswrProfile`]
pub struct SimulatedScanner {
    profile: VswrProfile,
    open_level_dbm: f64,
    noise: Option<(f64, StdRng)>,
    fail_after: Option<usize>,
    sweeps: usize,
    config: Option<SweepConfig>,
}

impl SimulatedScanner {
    /// Scanner producing `profile` with a -3 dBm open reference
    pub fn new(profile: VswrProfile) -> Self {
        Self {
            profile,
            open_level_dbm: -3.0,
            noise: None,
            fail_after: None,
            sweeps: 0,
            config: None,
        }
    }

    /// Set the open-circuit reference level
    #[must_use]
    pub fn with_open_level(mut self, dbm: f64) -> Self {
        self.open_level_dbm = dbm;
        self
    }

    /// Add uniform noise of ±`amplitude_db` with a fixed seed
    #[must_use]
    pub fn with_noise(mut self, amplitude_db: f64, seed: u64) -> Self {
        self.noise = Some((amplitude_db.abs(), StdRng::seed_from_u64(seed)));
        self
    }

    /// Disconnect after `sweeps` successful sweeps (baseline samples included)
    #[must_use]
    pub fn fail_after(mut self, sweeps: usize) -> Self {
        self.fail_after = Some(sweeps);
        self
    }

    fn next_sweep(&mut self) -> Result<SweepConfig, InstrumentError> {
        let config = self.config.ok_or(InstrumentError::NotConfigured)?;
        if self.fail_after.is_some_and(|limit| self.sweeps >= limit) {
            self.config = None;
            return Err(InstrumentError::Disconnected);
        }
        self.sweeps += 1;
        Ok(config)
    }

    fn jitter(&mut self) -> f64 {
        match &mut self.noise {
            Some((amplitude, rng)) if *amplitude > 0.0 => rng.gen_range(-*amplitude..=*amplitude),
            _ => 0.0,
        }
    }
}

impl Default for SimulatedScanner {
    fn default() -> Self {
        Self::new(VswrProfile::default())
    }
}

impl Scanner for SimulatedScanner {
    fn setup(&mut self, config: &SweepConfig) -> Result<(), InstrumentError> {
        if config.step_khz == 0 || config.stop_khz < config.start_khz || config.num_points == 0 {
            return Err(InstrumentError::InvalidSetting(format!("{config:?}")));
        }
        tracing::debug!("Simulated sweep {}-{} kHz, {} points", config.start_khz, config.stop_khz, config.num_points);
        self.config = Some(*config);
        Ok(())
    }

    fn sweep(&mut self) -> Result<Vec<f64>, InstrumentError> {
        let config = self.next_sweep()?;
        let mut readings = Vec::with_capacity(config.num_points);
        for i in 0..config.num_points {
            let frequency = config
                .start_khz
                .saturating_add(config.step_khz.saturating_mul(i as u32))
                .min(config.stop_khz);
            let vswr = self.profile.vswr_at(&config, frequency);
            let return_loss = return_loss_from_vswr(vswr).max(NOISE_FLOOR_DB);
            readings.push(self.open_level_dbm + return_loss + self.jitter());
        }
        Ok(readings)
    }

    fn baseline_sample(&mut self) -> Result<f64, InstrumentError> {
        self.next_sweep()?;
        Ok(self.open_level_dbm + self.jitter())
    }

    fn shutdown(&mut self) -> Result<(), InstrumentError> {
        self.config = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "Simulated scanner".to_string()
    }
}
