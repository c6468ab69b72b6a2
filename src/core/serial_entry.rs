//! Operator serial number entry
//!
//! A serial is exactly five ASCII letters, stored upper-case. Entry is
//! keystroke-driven: only letters are accepted, at most five of them, and
//! Enter commits only a complete serial.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Serial length
pub const SERIAL_LEN: usize = 5;

/// Serial validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// Wrong number of characters
    #[error("Serial must be {SERIAL_LEN} letters, got {0}")]
    Length(usize),

    /// Non-alphabetic character
    #[error("Serial may only contain letters, found {0:?}")]
    InvalidChar(char),
}

/// Prompt aborted by the operator
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Serial entry cancelled")]
pub struct Cancelled;

/// Validated unit serial
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Serial(String);

impl Serial {
    /// Validate and upper-case a serial
    pub fn parse(input: &str) -> Result<Self, SerialError> {
        let input = input.trim();
        if let Some(c) = input.chars().find(|c| !c.is_ascii_alphabetic()) {
            return Err(SerialError::InvalidChar(c));
        }
        if input.len() != SERIAL_LEN {
            return Err(SerialError::Length(input.chars().count()));
        }
        Ok(Self(input.to_ascii_uppercase()))
    }

    /// Serial text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Serial {
    type Error = SerialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Serial> for String {
    fn from(serial: Serial) -> Self {
        serial.0
    }
}

/// Keys the entry reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Printable character
    Char(char),
    /// Delete last character
    Backspace,
    /// Commit
    Enter,
    /// Cancel
    Escape,
}

/// Result of one keystroke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryEvent {
    /// Character appended
    Accepted(char),
    /// Key had no effect
    Ignored,
    /// Enter pressed with an incomplete serial
    Rejected(SerialError),
    /// Serial complete and confirmed
    Committed(Serial),
    /// Operator cancelled
    Cancelled,
}

/// Keystroke-validated serial buffer
#[derive(Debug, Default, Clone)]
pub struct SerialEntry {
    buffer: String,
}

impl SerialEntry {
    /// Empty entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Text typed so far
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Apply one keystroke
    pub fn handle(&mut self, key: Key) -> EntryEvent {
        match key {
            Key::Char(c) if c.is_ascii_alphabetic() && self.buffer.len() < SERIAL_LEN => {
                let c = c.to_ascii_uppercase();
                self.buffer.push(c);
                EntryEvent::Accepted(c)
            }
            Key::Char(_) => EntryEvent::Ignored,
            Key::Backspace => {
                if self.buffer.pop().is_some() {
                    EntryEvent::Accepted('\u{8}')
                } else {
                    EntryEvent::Ignored
                }
            }
            Key::Enter => match Serial::parse(&self.buffer) {
                Ok(serial) => EntryEvent::Committed(serial),
                Err(e) => EntryEvent::Rejected(e),
            },
            Key::Escape => {
                self.buffer.clear();
                EntryEvent::Cancelled
            }
        }
    }
}

/// Modal serial prompt
pub trait SerialPrompt {
    /// Block until the operator commits a valid serial or cancels
    fn prompt_serial(&mut self) -> Result<Serial, Cancelled>;
}

/// Prompt that replays a fixed answer; used by headless runs
#[derive(Debug, Clone)]
pub struct FixedSerial(pub Option<Serial>);

impl SerialPrompt for FixedSerial {
    fn prompt_serial(&mut self) -> Result<Serial, Cancelled> {
        self.0.clone().ok_or(Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(entry: &mut SerialEntry, text: &str) -> Vec<EntryEvent> {
        text.chars().map(|c| entry.handle(Key::Char(c))).collect()
    }

    #[test]
    fn test_serial_parse() {
        assert_eq!(Serial::parse("abCde").unwrap().as_str(), "ABCDE");
        assert_eq!(Serial::parse("ABCD"), Err(SerialError::Length(4)));
        assert_eq!(Serial::parse("AB1DE"), Err(SerialError::InvalidChar('1')));
        assert_eq!(Serial::parse("ABCDEF"), Err(SerialError::Length(6)));
    }

    #[test]
    fn test_entry_ignores_non_alphabetic() {
        let mut entry = SerialEntry::new();
        let events = type_str(&mut entry, "a1-b c");
        assert_eq!(events.iter().filter(|e| matches!(e, EntryEvent::Ignored)).count(), 3);
        assert_eq!(entry.text(), "ABC");
    }

    #[test]
    fn test_entry_caps_length() {
        let mut entry = SerialEntry::new();
        type_str(&mut entry, "abcdefg");
        assert_eq!(entry.text(), "ABCDE");
        assert_eq!(
            entry.handle(Key::Enter),
            EntryEvent::Committed(Serial::parse("ABCDE").unwrap())
        );
    }

    #[test]
    fn test_entry_refuses_short_commit() {
        let mut entry = SerialEntry::new();
        type_str(&mut entry, "abc");
        assert_eq!(entry.handle(Key::Enter), EntryEvent::Rejected(SerialError::Length(3)));
        entry.handle(Key::Backspace);
        assert_eq!(entry.text(), "AB");
        assert_eq!(entry.handle(Key::Escape), EntryEvent::Cancelled);
        assert_eq!(entry.text(), "");
    }

    #[test]
    fn test_fixed_prompt() {
        let mut prompt = FixedSerial(None);
        assert_eq!(prompt.prompt_serial(), Err(Cancelled));
    }
}
