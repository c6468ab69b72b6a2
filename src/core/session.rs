//! Scan session
//!
//! A ScanSession is the single owner of the scanner link. It configures the
//! instrument, captures the baseline, turns raw sweeps into VSWR results and
//! keeps the last results until the next reconfiguration or fault.

use crate::core::catalog::ScanParams;
use crate::core::scanner::{InstrumentError, Scanner, SweepConfig};
use crate::core::vswr::{vswr_from_return_loss, ScanPoint, ScanResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Baseline samples taken when not configured otherwise
pub const DEFAULT_BASELINE_SAMPLES: usize = 10;

/// Default wait for an in-flight operation on the Ctrl-C path
pub const SHUTDOWN_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

struct ScannerSlot {
    scanner: Box<dyn Scanner>,
    released: bool,
}

impl ScannerSlot {
    fn release(&mut self) -> Result<(), InstrumentError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        tracing::info!("Releasing {}", self.scanner.describe());
        self.scanner.shutdown()
    }

    fn release_logged(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("Scanner shutdown failed: {}", e);
        }
    }
}

/// Scanner plus the cross-thread shutdown request
struct Shared {
    slot: Mutex<ScannerSlot>,
    shutdown_requested: AtomicBool,
}

impl Shared {
    /// One scanner call under the lock
    ///
    /// A pending shutdown request refuses the call; a request that arrives
    /// while the call is in flight releases the link as soon as it returns.
    fn with_slot<T>(
        &self,
        call: impl FnOnce(&mut ScannerSlot) -> Result<T, InstrumentError>,
    ) -> Result<T, InstrumentError> {
        let mut slot = self.slot.lock();
        if self.shutdown_requested.load(Ordering::SeqCst) {
            slot.release_logged();
            return Err(InstrumentError::Released);
        }
        let result = call(&mut slot);
        if self.shutdown_requested.load(Ordering::SeqCst) {
            slot.release_logged();
        }
        result
    }
}

/// Handle that can release the scanner from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Release the link, waiting up to [`SHUTDOWN_LOCK_TIMEOUT`] for a busy session
    pub fn shutdown(&self) -> bool {
        self.shutdown_within(SHUTDOWN_LOCK_TIMEOUT)
    }

    /// Release the link, waiting up to `wait` for a busy session
    ///
    /// The request is recorded before waiting, so the session releases the
    /// link itself when its current call returns and refuses any further call.
    /// `false` means the call was still running when `wait` expired; exiting
    /// the process at that point leaves the instrument as it is.
    pub fn shutdown_within(&self, wait: Duration) -> bool {
        self.shared.shutdown_requested.store(true, Ordering::SeqCst);
        let Some(mut slot) = self.shared.slot.try_lock_for(wait) else {
            tracing::error!("Scanner busy for {:?}; link not released", wait);
            return false;
        };
        slot.release_logged();
        true
    }
}

/// Owner of the scanner and the last measurement results
///
/// Dropping the session releases the link, so unwinding out of the operator
/// loop still turns the instrument off.
pub struct ScanSession {
    shared: Arc<Shared>,
    configured: Option<SweepConfig>,
    last_baseline: Option<f64>,
    last_result: Option<ScanResult>,
}

impl ScanSession {
    /// Wrap a scanner; nothing is sent until [`setup`](Self::setup)
    pub fn new(scanner: Box<dyn Scanner>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(ScannerSlot {
                    scanner,
                    released: false,
                }),
                shutdown_requested: AtomicBool::new(false),
            }),
            configured: None,
            last_baseline: None,
            last_result: None,
        }
    }

    /// Handle for abnormal-termination paths
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether setup has succeeded since the last fault
    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    /// Scanner description
    pub fn describe(&self) -> String {
        self.shared.slot.lock().scanner.describe()
    }

    /// Last baseline (dBm)
    pub fn last_baseline(&self) -> Option<f64> {
        self.last_baseline
    }

    /// Last scan result
    pub fn last_result(&self) -> Option<&ScanResult> {
        self.last_result.as_ref()
    }

    /// Configure the scanner; reconfiguring discards previous results
    pub fn setup(&mut self, params: &ScanParams) -> Result<(), InstrumentError> {
        let config = SweepConfig::from(params);
        self.configured = None;
        self.clear_results();

        self.shared.with_slot(|slot| {
            slot.released = false;
            slot.scanner.setup(&config)
        })?;

        self.configured = Some(config);
        Ok(())
    }

    /// Take `samples` reference samples and keep the highest (dBm)
    pub fn run_baseline(&mut self, params: &ScanParams, samples: usize) -> Result<f64, InstrumentError> {
        self.check_configured(params)?;
        let result = self.sample_baseline(samples.max(1));
        match result {
            Ok(baseline) => {
                tracing::debug!("Baseline {:.2} dBm from {} samples", baseline, samples.max(1));
                self.last_baseline = Some(baseline);
                self.last_result = None;
                Ok(baseline)
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Sweep the configured range and convert each reading to VSWR
    pub fn run_scan(&mut self, params: &ScanParams) -> Result<&ScanResult, InstrumentError> {
        self.check_configured(params)?;
        let baseline = self.last_baseline.ok_or(InstrumentError::NotConfigured)?;
        self.last_result = None;

        let sweep = self.shared.with_slot(|slot| slot.scanner.sweep());
        let readings = match sweep {
            Ok(readings) => readings,
            Err(e) => return Err(self.fault(e)),
        };
        let expected = params.point_count();
        if readings.len() != expected {
            return Err(self.fault(InstrumentError::PartialSweep {
                expected,
                received: readings.len(),
            }));
        }

        let points = readings
            .iter()
            .enumerate()
            .map(|(i, reading)| ScanPoint {
                frequency_khz: params.frequency_at(i),
                vswr: vswr_from_return_loss(reading - baseline),
            })
            .collect();
        let result = ScanResult::new(points)
            .map_err(|e| self.fault(InstrumentError::InvalidSetting(e.to_string())))?;
        Ok(self.last_result.insert(result))
    }

    /// Drop baseline and scan result
    pub fn clear_results(&mut self) {
        self.last_baseline = None;
        self.last_result = None;
    }

    /// Release the instrument link; repeated calls are no-ops
    pub fn shutdown(&mut self) -> Result<(), InstrumentError> {
        self.configured = None;
        self.shared.slot.lock().release()
    }

    // Locked per sample so a shutdown request is honoured between samples.
    fn sample_baseline(&self, samples: usize) -> Result<f64, InstrumentError> {
        let mut highest = f64::NEG_INFINITY;
        for _ in 0..samples {
            highest = highest.max(self.shared.with_slot(|slot| slot.scanner.baseline_sample())?);
        }
        Ok(highest)
    }

    fn check_configured(&self, params: &ScanParams) -> Result<(), InstrumentError> {
        match self.configured {
            Some(config) if config == SweepConfig::from(params) => Ok(()),
            _ => Err(InstrumentError::NotConfigured),
        }
    }

    fn fault(&mut self, error: InstrumentError) -> InstrumentError {
        tracing::warn!("Instrument fault: {}", error);
        self.configured = None;
        self.clear_results();
        error
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Err(e) = self.shared.slot.lock().release() {
            tracing::warn!("Scanner shutdown on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{ConfigKey, ParameterCatalog};
    use crate::core::scanner::MockScanner;

    fn params() -> ScanParams {
        let catalog = ParameterCatalog::builtin().unwrap();
        catalog.resolve("E-Dot-Final".parse::<ConfigKey>().unwrap()).unwrap().clone()
    }

    fn bare() -> MockScanner {
        let mut scanner = MockScanner::new();
        scanner.expect_describe().return_const("mock".to_string());
        scanner
    }

    fn mock() -> MockScanner {
        let mut scanner = bare();
        scanner.expect_shutdown().returning(|| Ok(()));
        scanner
    }

    #[test]
    fn test_baseline_before_setup() {
        let mut session = ScanSession::new(Box::new(mock()));
        assert!(matches!(
            session.run_baseline(&params(), 3),
            Err(InstrumentError::NotConfigured)
        ));
    }

    #[test]
    fn test_baseline_takes_highest_sample() {
        let mut scanner = mock();
        scanner.expect_setup().times(1).returning(|_| Ok(()));
        let mut samples = vec![-3.5, -3.1, -3.3].into_iter();
        scanner
            .expect_baseline_sample()
            .times(3)
            .returning(move || Ok(samples.next().unwrap_or(-10.0)));

        let mut session = ScanSession::new(Box::new(scanner));
        session.setup(&params()).unwrap();
        let baseline = session.run_baseline(&params(), 3).unwrap();
        assert!((baseline + 3.1).abs() < 1e-9);
        assert_eq!(session.last_baseline(), Some(baseline));
    }

    #[test]
    fn test_scan_converts_readings() {
        let params = params();
        let points = params.point_count();
        let mut scanner = mock();
        scanner.expect_setup().returning(|_| Ok(()));
        scanner.expect_baseline_sample().returning(|| Ok(-3.0));
        // 20 dB below the open reference everywhere.
        scanner
            .expect_sweep()
            .returning(move || Ok(vec![-23.0; points]));

        let mut session = ScanSession::new(Box::new(scanner));
        session.setup(&params).unwrap();
        session.run_baseline(&params, 1).unwrap();
        let result = session.run_scan(&params).unwrap();
        assert_eq!(result.len(), points);
        assert_eq!(result.points()[0].frequency_khz, params.start_khz);
        assert_eq!(result.points()[points - 1].frequency_khz, params.stop_khz);
        assert!((result.points()[0].vswr - 1.2222).abs() < 1e-3);
    }

    #[test]
    fn test_partial_sweep_faults_session() {
        let params = params();
        let mut scanner = mock();
        scanner.expect_setup().returning(|_| Ok(()));
        scanner.expect_baseline_sample().returning(|| Ok(-3.0));
        scanner.expect_sweep().returning(|| Ok(vec![-20.0; 3]));

        let mut session = ScanSession::new(Box::new(scanner));
        session.setup(&params).unwrap();
        session.run_baseline(&params, 1).unwrap();
        assert!(matches!(
            session.run_scan(&params),
            Err(InstrumentError::PartialSweep { received: 3, .. })
        ));
        assert!(!session.is_configured());
        assert!(session.last_baseline().is_none());
        assert!(session.last_result().is_none());
        assert!(matches!(session.run_scan(&params), Err(InstrumentError::NotConfigured)));
    }

    #[test]
    fn test_setup_failure_leaves_unconfigured() {
        let mut scanner = mock();
        scanner
            .expect_setup()
            .returning(|_| Err(InstrumentError::Timeout("no answer".into())));
        let mut session = ScanSession::new(Box::new(scanner));
        assert!(session.setup(&params()).is_err());
        assert!(!session.is_configured());
    }

    #[test]
    fn test_shutdown_once() {
        let mut scanner = bare();
        scanner.expect_shutdown().times(1).returning(|| Ok(()));
        let mut session = ScanSession::new(Box::new(scanner));
        let handle = session.shutdown_handle();
        assert!(handle.shutdown());
        session.shutdown().unwrap();
        session.shutdown().unwrap();
    }

    #[test]
    fn test_drop_releases_scanner() {
        let mut scanner = bare();
        scanner.expect_shutdown().times(1).returning(|| Ok(()));
        drop(ScanSession::new(Box::new(scanner)));
    }

    #[test]
    fn test_drop_after_shutdown_releases_once() {
        let mut scanner = bare();
        scanner.expect_shutdown().times(1).returning(|| Ok(()));
        let mut session = ScanSession::new(Box::new(scanner));
        session.shutdown().unwrap();
        drop(session);
    }

    #[test]
    fn test_unwinding_releases_scanner() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let mut scanner = bare();
        scanner.expect_setup().returning(|_| Ok(()));
        scanner.expect_shutdown().times(1).returning(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut session = ScanSession::new(Box::new(scanner));
            session.setup(&params()).unwrap();
            panic!("operator loop failed");
        }));
        assert!(outcome.is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_request_refuses_setup() {
        let mut scanner = bare();
        scanner.expect_setup().never();
        scanner.expect_shutdown().times(1).returning(|| Ok(()));
        let mut session = ScanSession::new(Box::new(scanner));
        assert!(session.shutdown_handle().shutdown());
        assert!(matches!(session.setup(&params()), Err(InstrumentError::Released)));
        assert!(!session.is_configured());
    }

    #[test]
    fn test_busy_shutdown_releases_when_call_returns() {
        let params = params();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let mut scanner = bare();
        scanner.expect_setup().returning(|_| Ok(()));
        scanner.expect_baseline_sample().times(1).returning(move || {
            entered_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
            Ok(-3.0)
        });
        scanner.expect_shutdown().times(1).returning(|| Ok(()));

        let mut session = ScanSession::new(Box::new(scanner));
        session.setup(&params).unwrap();
        let handle = session.shutdown_handle();

        let worker = std::thread::spawn(move || {
            let baseline = session.run_baseline(&params, 2);
            (session, baseline)
        });
        entered_rx.recv().unwrap();
        // The first sample still holds the scanner.
        assert!(!handle.shutdown_within(Duration::from_millis(20)));

        let (mut session, baseline) = worker.join().unwrap();
        // Released after the first sample; the second was refused.
        assert!(matches!(baseline, Err(InstrumentError::Released)));
        assert!(!session.is_configured());
        assert!(handle.shutdown());
        session.shutdown().unwrap();
    }
}
