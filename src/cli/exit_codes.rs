//! CLI Exit Codes
//!
//! Every terminal calibration result has its own exit code, so scripts can
//! tell a denied command from a failed calibration without parsing output.

use crate::config::ConfigError;
use crate::core::result::SessionResult;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Calibration failed on the device
    pub const CALIBRATION_FAILED: u8 = 3;

    /// No acknowledgement, or overall deadline expired
    pub const TIMEOUT: u8 = 4;

    /// Calibration cancelled
    pub const CANCELLED: u8 = 5;

    /// Another calibration is running
    pub const BUSY: u8 = 6;

    /// Vehicle is armed
    pub const ARMED: u8 = 7;

    /// No vehicle
    pub const NO_DEVICE: u8 = 8;

    /// Link failure
    pub const CONNECTION_FAILED: u8 = 9;

    /// Command denied
    pub const COMMAND_DENIED: u8 = 10;

    /// Calibration not supported
    pub const UNSUPPORTED: u8 = 11;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 12;

    /// Unclassified failure reported by the vehicle
    pub const UNKNOWN_RESULT: u8 = 13;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Every defined code, in ascending order
    pub const ALL: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 127];
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

    /// Success carrying a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TIMEOUT, msg.into())
    }

    /// Invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
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
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&SessionResult> for CliResult {
    fn from(result: &SessionResult) -> Self {
        let code = match result {
            SessionResult::Success => return Self::success_with_message(result.to_string()),
            SessionResult::Failed(_) => ExitCodes::CALIBRATION_FAILED,
            SessionResult::Cancelled => ExitCodes::CANCELLED,
            SessionResult::Busy => ExitCodes::BUSY,
            SessionResult::ArmedRejection => ExitCodes::ARMED,
            SessionResult::NoDevice => ExitCodes::NO_DEVICE,
            SessionResult::ConnectionError => ExitCodes::CONNECTION_FAILED,
            SessionResult::CommandDenied => ExitCodes::COMMAND_DENIED,
            SessionResult::Unsupported => ExitCodes::UNSUPPORTED,
            SessionResult::Timeout => ExitCodes::TIMEOUT,
            SessionResult::UnknownError => ExitCodes::UNKNOWN_RESULT,
            SessionResult::Next => ExitCodes::INTERNAL_ERROR,
        };
        Self::Error(code, result.to_string())
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
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Calibration failed",
        4 => "Timeout",
        5 => "Calibration cancelled",
        6 => "Another calibration is running",
        7 => "Vehicle is armed",
        8 => "No vehicle",
        9 => "Connection error",
        10 => "Command denied",
        11 => "Calibration not supported",
        12 => "Configuration error",
        13 => "Unknown vehicle error",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
