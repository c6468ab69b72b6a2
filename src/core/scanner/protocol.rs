//! TPI wire protocol framing
//!
//! Frame layout: `AA 55 len_hi len_lo body.. chk` where
//! `chk = 0xFF - ((len_hi + len_lo + sum(body)) & 0xFF)`.
//! The first two body bytes are the command (`08 xx` write, `07 xx` read).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Frame sync bytes
pub const SYNC: [u8; 2] = [0xAA, 0x55];

pub(crate) const CMD_READ_MODEL: [u8; 2] = [0x07, 0x02];
pub(crate) const CMD_ENABLE_USER_CONTROL: [u8; 2] = [0x08, 0x01];
pub(crate) const CMD_SET_RF_POWER: [u8; 2] = [0x08, 0x0A];
pub(crate) const CMD_SET_RF_OUTPUT: [u8; 2] = [0x08, 0x0B];
pub(crate) const CMD_SET_ANALYZER: [u8; 2] = [0x08, 0x3C];
pub(crate) const CMD_START_ANALYZER: [u8; 2] = [0x08, 0x3D];
pub(crate) const EVT_ANALYZER_DATA: [u8; 2] = [0x07, 0x3E];
pub(crate) const EVT_ANALYZER_STOPPED: [u8; 2] = [0x07, 0x3F];

/// Instrument limits for the analyzer command
const MAX_POINTS_PER_PACKET: u8 = 50;
const MAX_AVERAGES_PER_POINT: u8 = 10;

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Checksum byte does not match the frame contents
    #[error("Checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch {
        /// Computed checksum
        expected: u8,
        /// Received checksum
        actual: u8,
    },

    /// Response command differs from the request
    #[error("Unexpected response to {command}: {body}")]
    UnexpectedResponse {
        /// Request command (hex)
        command: String,
        /// Response body (hex)
        body: String,
    },

    /// Frame body too short or inconsistent
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Checksum over the length bytes and body
pub fn checksum(body: &[u8]) -> u8 {
    let len = body.len() as u16;
    let [len_hi, len_lo] = len.to_be_bytes();
    let sum = body
        .iter()
        .fold(len_hi.wrapping_add(len_lo), |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// Wrap a command body in a frame
pub fn encode_frame(body: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(body.len() + 5);
    frame.put_slice(&SYNC);
    frame.put_u16(body.len() as u16);
    frame.put_slice(body);
    frame.put_u8(checksum(body));
    frame.freeze()
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Frame from an already-validated body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Frame body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Command bytes, if present
    pub fn command(&self) -> Option<[u8; 2]> {
        (self.body.len() >= 2).then(|| [self.body[0], self.body[1]])
    }

    /// Whether this frame answers `command`
    pub fn is(&self, command: [u8; 2]) -> bool {
        self.command() == Some(command)
    }

    /// Error unless the frame answers `command`
    pub(crate) fn expect_reply(self, command: [u8; 2]) -> Result<Self, ProtocolError> {
        if self.is(command) {
            Ok(self)
        } else {
            Err(ProtocolError::UnexpectedResponse {
                command: hex::encode(command),
                body: hex::encode(&self.body),
            })
        }
    }

    /// Analyzer data packet: first step index and one reading (dBm) per point
    pub fn analyzer_points(&self) -> Result<(u32, Vec<f32>), ProtocolError> {
        if !self.is(EVT_ANALYZER_DATA) || self.body.len() < 7 {
            return Err(ProtocolError::Malformed(format!(
                "not an analyzer data packet: {}",
                hex::encode(&self.body)
            )));
        }
        let mut rest = &self.body[2..];
        let count = rest.get_u8() as usize;
        let first_step = rest.get_u32_le();
        if rest.len() < count * 4 {
            return Err(ProtocolError::Malformed(format!(
                "analyzer packet announces {} points but carries {} bytes",
                count,
                rest.len()
            )));
        }
        let points = (0..count).map(|_| rest.get_f32_le()).collect();
        Ok((first_step, points))
    }
}

/// Incremental frame decoder; resynchronises on the `AA 55` marker
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, `None` if more bytes are needed
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        match self.buffer.windows(2).position(|w| w == SYNC) {
            Some(offset) => self.buffer.advance(offset),
            None => {
                // Keep a trailing AA in case its 55 is still in flight.
                let keep = usize::from(self.buffer.last() == Some(&SYNC[0]));
                let drop = self.buffer.len() - keep;
                self.buffer.advance(drop);
                return None;
            }
        }

        if self.buffer.len() < 4 {
            return None;
        }
        let len = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer.len() < 4 + len + 1 {
            return None;
        }

        let expected = checksum(&self.buffer[4..4 + len]);
        let actual = self.buffer[4 + len];
        if expected != actual {
            // Skip this marker so the next call rescans past it.
            self.buffer.advance(2);
            return Some(Err(ProtocolError::ChecksumMismatch { expected, actual }));
        }

        self.buffer.advance(4);
        let body = self.buffer.split_to(len).freeze();
        self.buffer.advance(1);
        Some(Ok(Frame { body }))
    }
}

/// Parameters for the v2 analyzer command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerParameters {
    /// Start frequency (kHz)
    pub start_khz: u32,
    /// Stop frequency (kHz)
    pub stop_khz: u32,
    /// Step (kHz)
    pub step_khz: u32,
    /// Dwell per point (ms)
    pub dwell_ms: u16,
    /// Points per sweep
    pub num_points: u32,
    /// Automatic RF level
    pub auto_rf: bool,
    /// Points per data packet (instrument maximum 50)
    pub max_points_per_packet: u8,
    /// ADC averages per point (1..=10)
    pub averages_per_point: u8,
}

impl AnalyzerParameters {
    /// Command body, with packet size and averaging clamped to instrument limits
    pub fn encode(&self) -> Vec<u8> {
        let mut body = BytesMut::with_capacity(23);
        body.put_slice(&CMD_SET_ANALYZER);
        body.put_u32_le(self.start_khz);
        body.put_u32_le(self.stop_khz);
        body.put_u32_le(self.step_khz);
        body.put_u16_le(self.dwell_ms);
        body.put_u32_le(self.num_points);
        body.put_u8(u8::from(self.auto_rf));
        body.put_u8(self.max_points_per_packet.min(MAX_POINTS_PER_PACKET));
        body.put_u8(self.averages_per_point.clamp(1, MAX_AVERAGES_PER_POINT));
        body.to_vec()
    }
}
