//! TPI scanner driver over a serial port

use super::protocol::{
    encode_frame, AnalyzerParameters, Frame, FrameDecoder, CMD_ENABLE_USER_CONTROL, CMD_READ_MODEL,
    CMD_SET_RF_OUTPUT, CMD_SET_RF_POWER, CMD_START_ANALYZER, EVT_ANALYZER_STOPPED,
};
use super::{InstrumentError, Scanner, SweepConfig};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Poll interval for individual port reads
const READ_POLL: Duration = Duration::from_millis(100);
/// Dwell range accepted by the analyzer
const DWELL_RANGE_MS: std::ops::RangeInclusive<u32> = 2..=500;
/// RF power range accepted by the source (dBm)
const RF_POWER_RANGE_DBM: std::ops::RangeInclusive<i8> = -90..=10;
/// Longest gap between analyzer data packets
const MAX_MS_BETWEEN_PACKETS: u16 = 1000;

/// Serial link and instrument settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpiSettings {
    /// Port name (e.g., COM16, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout per command (ms)
    pub timeout_ms: u64,
    /// Upper bound for one complete sweep (ms)
    pub sweep_timeout_ms: u64,
    /// Attempts to open the port
    pub open_retries: u32,
    /// Delay between open attempts (ms)
    pub retry_delay_ms: u64,
    /// Source power (dBm)
    pub rf_power_dbm: i8,
    /// ADC averages per point
    pub averages_per_point: u8,
    /// Points per analyzer data packet
    pub max_points_per_packet: u8,
}

impl TpiSettings {
    /// Settings for a port with instrument defaults
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: 3_000_000,
            timeout_ms: 1_000,
            sweep_timeout_ms: 10_000,
            open_retries: 3,
            retry_delay_ms: 2_000,
            rf_power_dbm: 0,
            averages_per_point: 8,
            max_points_per_packet: 40,
        }
    }

    /// Set baud rate
    #[must_use]
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set command timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set open retry policy
    #[must_use]
    pub fn open_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_retries = attempts.max(1);
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Upper bound on one blocking driver call (setup or a single sweep)
    ///
    /// Setup opens the port, then sends up to six commands. A sweep sends the
    /// start command, then waits for the data.
    pub fn longest_operation(&self) -> Duration {
        let attempts = u64::from(self.open_retries.max(1));
        let setup = attempts * (self.timeout_ms + self.retry_delay_ms) + 6 * self.timeout_ms;
        let sweep = 2 * self.timeout_ms + self.sweep_timeout_ms;
        Duration::from_millis(setup.max(sweep))
    }
}

impl Default for TpiSettings {
    fn default() -> Self {
        Self::new("COM16")
    }
}

/// Open serial link with frame handling
struct TpiLink {
    port: Box<dyn SerialPort>,
    decoder: FrameDecoder,
    timeout: Duration,
}

impl TpiLink {
    fn open(settings: &TpiSettings) -> Result<Self, InstrumentError> {
        let attempts = settings.open_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            tracing::debug!("Opening {} (attempt {}/{})", settings.port, attempt, attempts);
            match serialport::new(&settings.port, settings.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::Hardware)
                .timeout(READ_POLL)
                .open()
            {
                Ok(port) => {
                    tracing::info!("Serial port {} opened", settings.port);
                    return Ok(Self {
                        port,
                        decoder: FrameDecoder::new(),
                        timeout: Duration::from_millis(settings.timeout_ms),
                    });
                }
                Err(e) => {
                    tracing::warn!("Open attempt {} on {} failed: {}", attempt, settings.port, e);
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                std::thread::sleep(Duration::from_millis(settings.retry_delay_ms));
            }
        }

        Err(InstrumentError::OpenFailed {
            port: settings.port.clone(),
            attempts,
            reason: last_error,
        })
    }

    fn send_command(&mut self, body: &[u8]) -> Result<Frame, InstrumentError> {
        let frame = encode_frame(body);
        self.port.clear(ClearBuffer::Input)?;
        self.decoder = FrameDecoder::new();
        tracing::trace!(tx = %hex::encode(&frame), "TPI command");
        self.port.write_all(&frame)?;
        self.port.flush()?;
        self.read_frame(Instant::now() + self.timeout)
    }

    fn read_frame(&mut self, deadline: Instant) -> Result<Frame, InstrumentError> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(result) = self.decoder.next_frame() {
                let frame = result?;
                tracing::trace!(rx = %hex::encode(frame.body()), "TPI frame");
                return Ok(frame);
            }
            if Instant::now() >= deadline {
                return Err(InstrumentError::Timeout(timeout_reason(self.decoder.pending())));
            }
            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn command(&mut self, body: &[u8]) -> Result<Frame, InstrumentError> {
        let command = [body[0], body[1]];
        Ok(self.send_command(body)?.expect_reply(command)?)
    }

    fn enable_user_control(&mut self) -> Result<(), InstrumentError> {
        // Reading the model succeeds only once user control is active.
        if let Ok(frame) = self.send_command(&CMD_READ_MODEL) {
            if frame.is(CMD_READ_MODEL) {
                return Ok(());
            }
        }
        self.command(&CMD_ENABLE_USER_CONTROL)?;
        self.command(&CMD_READ_MODEL)
            .map(|_| ())
            .map_err(|_| InstrumentError::Rejected("user control verification failed".into()))
    }

    fn set_rf_power(&mut self, dbm: i8) -> Result<(), InstrumentError> {
        if !RF_POWER_RANGE_DBM.contains(&dbm) {
            return Err(InstrumentError::InvalidSetting(format!("RF power {dbm} dBm out of range")));
        }
        self.command(&[CMD_SET_RF_POWER[0], CMD_SET_RF_POWER[1], dbm as u8])
            .map(|_| ())
    }

    fn set_rf_output(&mut self, on: bool) -> Result<(), InstrumentError> {
        self.command(&[CMD_SET_RF_OUTPUT[0], CMD_SET_RF_OUTPUT[1], u8::from(on)])
            .map(|_| ())
    }

    fn start_analyzer(&mut self) -> Result<(), InstrumentError> {
        let [ms_lo, ms_hi] = MAX_MS_BETWEEN_PACKETS.to_le_bytes();
        // start, single sweep, packet gap, normal (not aux-armed)
        let body = [CMD_START_ANALYZER[0], CMD_START_ANALYZER[1], 1, 0, ms_lo, ms_hi, 0];
        self.command(&body).map(|_| ())
    }

    fn read_sweep(&mut self, expected: usize, deadline: Instant) -> Result<Vec<f64>, InstrumentError> {
        let mut points = BTreeMap::new();
        loop {
            let packet_deadline =
                deadline.min(Instant::now() + Duration::from_millis(u64::from(MAX_MS_BETWEEN_PACKETS) * 2));
            let frame = match self.read_frame(packet_deadline) {
                Ok(frame) => frame,
                Err(InstrumentError::Protocol(e)) => {
                    tracing::warn!("Dropping corrupt analyzer packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if frame.is(EVT_ANALYZER_STOPPED) {
                break;
            }
            match frame.analyzer_points() {
                Ok((first_step, readings)) => {
                    for (i, dbm) in readings.into_iter().enumerate() {
                        points.insert(first_step as usize + i, f64::from(dbm));
                    }
                }
                Err(e) => tracing::debug!("Ignoring frame during sweep: {}", e),
            }
        }

        let contiguous = points.keys().copied().eq(0..points.len());
        if points.len() != expected || !contiguous {
            return Err(InstrumentError::PartialSweep {
                expected,
                received: points.len(),
            });
        }
        Ok(points.into_values().collect())
    }
}

/// Scanner backed by the TPI analyzer
pub struct TpiScanner {
    settings: TpiSettings,
    link: Option<TpiLink>,
    config: Option<SweepConfig>,
}

impl TpiScanner {
    /// Create a driver; the port is opened on the first setup
    pub fn new(settings: TpiSettings) -> Self {
        Self {
            settings,
            link: None,
            config: None,
        }
    }

    fn configure(&mut self, config: &SweepConfig) -> Result<(), InstrumentError> {
        if !DWELL_RANGE_MS.contains(&config.dwell_ms) {
            return Err(InstrumentError::InvalidSetting(format!(
                "dwell {} ms outside {}..={} ms",
                config.dwell_ms,
                DWELL_RANGE_MS.start(),
                DWELL_RANGE_MS.end()
            )));
        }
        let num_points = u32::try_from(config.num_points)
            .map_err(|_| InstrumentError::InvalidSetting("too many sweep points".into()))?;

        if self.link.is_none() {
            self.link = Some(TpiLink::open(&self.settings)?);
        }
        let settings = self.settings.clone();
        let link = self.link.as_mut().ok_or(InstrumentError::NotConfigured)?;

        link.enable_user_control()?;
        link.set_rf_power(settings.rf_power_dbm)?;
        link.command(
            &AnalyzerParameters {
                start_khz: config.start_khz,
                stop_khz: config.stop_khz,
                step_khz: config.step_khz,
                dwell_ms: config.dwell_ms as u16,
                num_points,
                auto_rf: true,
                max_points_per_packet: settings.max_points_per_packet,
                averages_per_point: settings.averages_per_point,
            }
            .encode(),
        )?;
        link.set_rf_output(true)?;
        Ok(())
    }
}

impl Scanner for TpiScanner {
    fn setup(&mut self, config: &SweepConfig) -> Result<(), InstrumentError> {
        self.config = None;
        if let Err(e) = self.configure(config) {
            // Leave the port closed so the next setup starts from a clean link.
            self.link = None;
            return Err(e);
        }
        tracing::debug!(
            "Analyzer configured: {}-{} kHz step {} kHz dwell {} ms ({} points)",
            config.start_khz,
            config.stop_khz,
            config.step_khz,
            config.dwell_ms,
            config.num_points
        );
        self.config = Some(*config);
        Ok(())
    }

    fn sweep(&mut self) -> Result<Vec<f64>, InstrumentError> {
        let config = self.config.ok_or(InstrumentError::NotConfigured)?;
        let link = self.link.as_mut().ok_or(InstrumentError::NotConfigured)?;
        let deadline = Instant::now() + Duration::from_millis(self.settings.sweep_timeout_ms);

        let result = link
            .start_analyzer()
            .and_then(|()| link.read_sweep(config.num_points, deadline));
        if result.is_err() {
            self.config = None;
            self.link = None;
        }
        result
    }

    fn shutdown(&mut self) -> Result<(), InstrumentError> {
        self.config = None;
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };
        let result = link.set_rf_output(false);
        drop(link);
        tracing::info!("Serial port {} closed", self.settings.port);
        result
    }

    fn describe(&self) -> String {
        format!("TPI scanner on {} @ {} baud", self.settings.port, self.settings.baud_rate)
    }
}

fn timeout_reason(pending: usize) -> String {
    if pending == 0 {
        "no response frame".into()
    } else {
        format!("incomplete response frame ({pending} bytes buffered)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = TpiSettings::new("/dev/ttyUSB0")
            .baud_rate(115_200)
            .timeout(Duration::from_millis(250))
            .open_retries(0, Duration::from_millis(10));
        assert_eq!(settings.port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.timeout_ms, 250);
        assert_eq!(settings.open_retries, 1);
    }

    #[test]
    fn test_timeout_reports_partial_frame() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(timeout_reason(decoder.pending()), "no response frame");

        let frame = encode_frame(&CMD_READ_MODEL);
        decoder.push(&frame[..frame.len() - 1]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(
            timeout_reason(decoder.pending()),
            format!("incomplete response frame ({} bytes buffered)", frame.len() - 1)
        );
    }

    #[test]
    fn test_longest_operation_covers_retries_and_sweep() {
        // 3 x (1 s + 2 s) + 6 x 1 s
        assert_eq!(TpiSettings::default().longest_operation(), Duration::from_secs(15));

        let mut slow_sweep = TpiSettings::default().open_retries(1, Duration::ZERO);
        slow_sweep.sweep_timeout_ms = 30_000;
        assert_eq!(slow_sweep.longest_operation(), Duration::from_secs(32));
    }

    #[test]
    fn test_sweep_before_setup() {
        let mut scanner = TpiScanner::new(TpiSettings::default());
        assert!(matches!(scanner.sweep(), Err(InstrumentError::NotConfigured)));
        // Shutting down an unopened link is a no-op.
        assert!(scanner.shutdown().is_ok());
        assert!(scanner.shutdown().is_ok());
    }

    #[test]
    fn test_dwell_checked_before_opening_port() {
        let mut scanner = TpiScanner::new(TpiSettings::new("/dev/does-not-exist"));
        let err = scanner
            .setup(&SweepConfig {
                start_khz: 1_000,
                stop_khz: 2_000,
                step_khz: 100,
                dwell_ms: 1_000,
                num_points: 11,
            })
            .unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidSetting(_)));
    }
}
