//! Scanner capability
//!
//! The test sequence talks to the frequency scanner only through the
//! [`Scanner`] trait. Implementations:
//! - [`TpiScanner`] drives the instrument over its serial wire protocol
//! - [`SimulatedScanner`] synthesises sweeps for bench use and tests

mod protocol;
mod simulated;
mod tpi;

pub use protocol::{checksum, encode_frame, AnalyzerParameters, Frame, FrameDecoder, ProtocolError};
pub use simulated::{SimulatedScanner, VswrProfile};
pub use tpi::{TpiScanner, TpiSettings};

use crate::core::catalog::ScanParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Instrument error types
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// Scanner used before a successful setup
    #[error("Scanner not set up")]
    NotConfigured,

    /// Serial link could not be opened
    #[error("Failed to open {port} after {attempts} attempts: {reason}")]
    OpenFailed {
        /// Port name
        port: String,
        /// Attempts made
        attempts: u32,
        /// Last failure
        reason: String,
    },

    /// No response within the link timeout
    #[error("Instrument timeout: {0}")]
    Timeout(String),

    /// Malformed or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Instrument refused a command
    #[error("Instrument rejected command: {0}")]
    Rejected(String),

    /// Setting outside what the instrument accepts
    #[error("Invalid instrument setting: {0}")]
    InvalidSetting(String),

    /// Link lost
    #[error("Instrument disconnected")]
    Disconnected,

    /// Link released by a shutdown request; no further operations run
    #[error("Scanner link released")]
    Released,

    /// Sweep ended early or delivered too many points
    #[error("Partial sweep: expected {expected} points, received {received}")]
    PartialSweep {
        /// Points expected from the configuration
        expected: usize,
        /// Points delivered
        received: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for InstrumentError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Self::Timeout(err.to_string())
            }
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => Self::Disconnected,
            _ => Self::Io(err),
        }
    }
}

impl From<serialport::Error> for InstrumentError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::Disconnected,
            serialport::ErrorKind::Io(kind) => Self::from(std::io::Error::new(kind, err.description)),
            _ => Self::Io(std::io::Error::new(std::io::ErrorKind::Other, err.description)),
        }
    }
}

/// Sweep configuration pushed to the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Start frequency (kHz)
    pub start_khz: u32,
    /// Stop frequency (kHz)
    pub stop_khz: u32,
    /// Step (kHz)
    pub step_khz: u32,
    /// Dwell per point (ms)
    pub dwell_ms: u32,
    /// Points per sweep
    pub num_points: usize,
}

impl From<&ScanParams> for SweepConfig {
    fn from(params: &ScanParams) -> Self {
        Self {
            start_khz: params.start_khz,
            stop_khz: params.stop_khz,
            step_khz: params.step_khz,
            dwell_ms: params.dwell_ms,
            num_points: params.point_count(),
        }
    }
}

/// Frequency scanner capability
#[cfg_attr(test, mockall::automock)]
pub trait Scanner: Send {
    /// Configure start/stop/step/dwell; may be called again to reconfigure
    fn setup(&mut self, config: &SweepConfig) -> Result<(), InstrumentError>;

    /// One raw sweep: the reading (dBm) at every configured point, in order
    fn sweep(&mut self) -> Result<Vec<f64>, InstrumentError>;

    /// One baseline reference sample (dBm)
    ///
    /// The default takes the mean level of one sweep.
    fn baseline_sample(&mut self) -> Result<f64, InstrumentError> {
        let readings = self.sweep()?;
        if readings.is_empty() {
            return Err(InstrumentError::PartialSweep {
                expected: 1,
                received: 0,
            });
        }
        Ok(readings.iter().sum::<f64>() / readings.len() as f64)
    }

    /// Release the instrument link
    fn shutdown(&mut self) -> Result<(), InstrumentError>;

    /// Short description for logs and status
    fn describe(&self) -> String;
}

/// Driver selection for the front-ends
pub fn open_scanner(settings: &TpiSettings, simulate: bool) -> Box<dyn Scanner> {
    if simulate {
        tracing::info!("Using simulated scanner");
        Box::new(SimulatedScanner::default())
    } else {
        Box::new(TpiScanner::new(settings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err = InstrumentError::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err, InstrumentError::Timeout(_)));

        let err = InstrumentError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(err, InstrumentError::Disconnected));
    }

    struct FixedSweep(Vec<f64>);

    impl Scanner for FixedSweep {
        fn setup(&mut self, _config: &SweepConfig) -> Result<(), InstrumentError> {
            Ok(())
        }

        fn sweep(&mut self) -> Result<Vec<f64>, InstrumentError> {
            Ok(self.0.clone())
        }

        fn shutdown(&mut self) -> Result<(), InstrumentError> {
            Ok(())
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    #[test]
    fn test_default_baseline_sample_is_sweep_mean() {
        let mut scanner = FixedSweep(vec![-2.0, -4.0, -6.0]);
        assert!((scanner.baseline_sample().unwrap() + 4.0).abs() < 1e-9);

        let mut empty = FixedSweep(Vec::new());
        assert!(matches!(
            empty.baseline_sample(),
            Err(InstrumentError::PartialSweep { received: 0, .. })
        ));
    }
}
