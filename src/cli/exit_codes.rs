//! CLI Exit Codes
//!
//! Exit codes for headless checks and automation.

use crate::config::ConfigError;
use crate::core::catalog::CatalogError;
use crate::core::chart::SaveError;
use crate::core::scanner::InstrumentError;
use std::any::Any;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success (unit passed)
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Unit failed the VSWR limit
    pub const TEST_FAILED: u8 = 3;

    /// Instrument timeout
    pub const TIMEOUT: u8 = 4;

    /// Instrument communication failed
    pub const INSTRUMENT_ERROR: u8 = 5;

    /// Configuration key not in the catalog
    pub const UNKNOWN_CONFIGURATION: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Artifact could not be saved
    pub const SAVE_FAILED: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Unit outside its limit
    pub fn test_failed(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TEST_FAILED, msg.into())
    }

    /// Panic caught at the top of a binary
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Error(ExitCodes::INTERNAL_ERROR, format!("Internal error: {detail}"))
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<InstrumentError> for CliResult {
    fn from(err: InstrumentError) -> Self {
        let code = match &err {
            InstrumentError::Timeout(_) => ExitCodes::TIMEOUT,
            InstrumentError::Protocol(_) => ExitCodes::PROTOCOL_ERROR,
            InstrumentError::OpenFailed { .. } => ExitCodes::PORT_NOT_FOUND,
            InstrumentError::InvalidSetting(_) => ExitCodes::CONFIG_ERROR,
            InstrumentError::Released => ExitCodes::CANCELLED,
            _ => ExitCodes::INSTRUMENT_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<CatalogError> for CliResult {
    fn from(err: CatalogError) -> Self {
        let code = match &err {
            CatalogError::UnknownConfiguration(_) | CatalogError::UnknownLabel { .. } => {
                ExitCodes::UNKNOWN_CONFIGURATION
            }
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<SaveError> for CliResult {
    fn from(err: SaveError) -> Self {
        Self::Error(ExitCodes::SAVE_FAILED, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success (unit passed)",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "VSWR test failed",
        4 => "Instrument timeout",
        5 => "Instrument error",
        6 => "Unknown configuration",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        10 => "Save failed",
        11 => "Operation cancelled",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
