//! Calibration commands and command-result translation
//!
//! The command engine that sends, acknowledges, retries and times out
//! commands lives outside this crate. It reports back with a
//! [`CommandResult`] plus a progress value, which
//! [`translate_command_result`] turns into a calibration outcome.

use super::result::{ProgressReport, SessionResult};
use serde::{Deserialize, Serialize};

/// `MAV_CMD_PREFLIGHT_CALIBRATION`
pub const PREFLIGHT_CALIBRATION: u16 = 241;

/// `MAV_COMP_ID_AUTOPILOT1`
pub const AUTOPILOT_COMPONENT_ID: u8 = 1;

/// Result reported by the command engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    /// Command accepted
    Success,
    /// No system to send to
    NoDevice,
    /// Transport failed
    ConnectionError,
    /// Device busy
    Busy,
    /// Device denied the command
    CommandDenied,
    /// Device does not support the command
    Unsupported,
    /// No acknowledgement within the engine's retry budget
    Timeout,
    /// Command accepted and running, progress attached
    InProgress,
    /// Anything else
    UnknownError,
}

/// Long-form command as handed to the command engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandLong {
    /// Command id
    pub command: u16,
    /// Component the command is addressed to
    pub target_component: u8,
    /// Parameters 1 to 7
    pub params: [f32; 7],
}

impl CommandLong {
    /// Command with all parameters reserved (zero)
    pub fn new(command: u16, target_component: u8) -> Self {
        Self {
            command,
            target_component,
            params: [0.0; 7],
        }
    }

    /// Request a radio controller calibration
    pub fn start_radio_calibration(target_component: u8) -> Self {
        let mut command = Self::new(PREFLIGHT_CALIBRATION, target_component);
        // param4: remote control
        command.params[3] = 1.0;
        command
    }

    /// Cancel whatever calibration is running
    ///
    /// All parameters zero signals cancellation.
    pub fn cancel_calibration(target_component: u8) -> Self {
        Self::new(PREFLIGHT_CALIBRATION, target_component)
    }

    /// Check if this is a calibration cancellation
    pub fn is_calibration_cancel(&self) -> bool {
        self.command == PREFLIGHT_CALIBRATION && self.params.iter().all(|p| *p == 0.0)
    }

    /// Check if this requests a radio controller calibration
    pub fn is_radio_calibration(&self) -> bool {
        self.command == PREFLIGHT_CALIBRATION && self.params[3] == 1.0
    }
}

/// What a command result means for a running calibration
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// Command accepted; completion is confirmed by statustext later
    Accepted,
    /// Non-terminal progress reported through the acknowledgement
    Progress(ProgressReport),
    /// The calibration ends with this result
    Terminal(SessionResult),
}

/// Translate a command-engine result into a calibration outcome
///
/// An accepted command only means the device started working on it, so
/// `Success` is not terminal. Older firmware reports completion only as
/// statustext; newer firmware additionally reports `InProgress` acks.
pub fn translate_command_result(result: CommandResult, progress: f32) -> Translation {
    match result {
        CommandResult::Success => Translation::Accepted,
        CommandResult::InProgress => Translation::Progress(ProgressReport::with_progress(progress)),
        CommandResult::NoDevice => Translation::Terminal(SessionResult::NoDevice),
        CommandResult::ConnectionError => Translation::Terminal(SessionResult::ConnectionError),
        CommandResult::Busy => Translation::Terminal(SessionResult::Busy),
        CommandResult::CommandDenied => Translation::Terminal(SessionResult::CommandDenied),
        CommandResult::Unsupported => Translation::Terminal(SessionResult::Unsupported),
        CommandResult::Timeout => Translation::Terminal(SessionResult::Timeout),
        CommandResult::UnknownError => Translation::Terminal(SessionResult::UnknownError),
    }
}
