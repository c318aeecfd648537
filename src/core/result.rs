//! Calibration outcomes and progress reports
//!
//! Everything a calibration callback ever receives is built from the two
//! types in this module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome delivered to a calibration callback
///
/// `Next` is the only non-terminal member. Every other variant ends the
/// session it was delivered for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum SessionResult {
    /// Calibration completed on the device
    Success,
    /// Progress update, more updates follow
    Next,
    /// Device reported a failure
    Failed(String),
    /// Calibration was cancelled on the device
    Cancelled,
    /// Another calibration is already running
    Busy,
    /// Device is armed, calibration refused
    ArmedRejection,
    /// No device to talk to
    NoDevice,
    /// Connection error while sending the command
    ConnectionError,
    /// Device denied the command
    CommandDenied,
    /// Device does not support the command
    Unsupported,
    /// Command was not acknowledged in time
    Timeout,
    /// Anything the command layer could not classify
    UnknownError,
}

impl SessionResult {
    /// Check if this outcome ends the session
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next)
    }

    /// Check if this outcome is a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short machine-friendly name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Next => "next",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
            Self::ArmedRejection => "armed_rejection",
            Self::NoDevice => "no_device",
            Self::ConnectionError => "connection_error",
            Self::CommandDenied => "command_denied",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Next => write!(f, "Next"),
            Self::Failed(reason) if reason.is_empty() => write!(f, "Calibration failed"),
            Self::Failed(reason) => write!(f, "Calibration failed: {}", reason),
            Self::Cancelled => write!(f, "Calibration cancelled"),
            Self::Busy => write!(f, "Calibration already in progress"),
            Self::ArmedRejection => write!(f, "Vehicle is armed"),
            Self::NoDevice => write!(f, "No device connected"),
            Self::ConnectionError => write!(f, "Connection error"),
            Self::CommandDenied => write!(f, "Command denied"),
            Self::Unsupported => write!(f, "Command unsupported"),
            Self::Timeout => write!(f, "Command timed out"),
            Self::UnknownError => write!(f, "Unknown error"),
        }
    }
}

/// Progress payload accompanying a callback
///
/// Holds at most one of a completion fraction or an instruction text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_text: Option<String>,
}

impl ProgressReport {
    /// Report without payload
    pub fn empty() -> Self {
        Self::default()
    }

    /// Completion fraction, clamped to `[0, 1]`
    ///
    /// Non-finite input produces an empty report.
    pub fn with_progress(fraction: f32) -> Self {
        if !fraction.is_finite() {
            return Self::empty();
        }
        Self {
            progress: Some(fraction.clamp(0.0, 1.0)),
            status_text: None,
        }
    }

    /// Instruction for the user
    pub fn with_instruction(text: impl Into<String>) -> Self {
        Self {
            progress: None,
            status_text: Some(text.into()),
        }
    }

    /// Completion fraction, if this report carries one
    pub fn progress(&self) -> Option<f32> {
        self.progress
    }

    /// Instruction text, if this report carries one
    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    /// Check if the report carries nothing
    pub fn is_empty(&self) -> bool {
        self.progress.is_none() && self.status_text.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_next_is_non_terminal() {
        assert!(!SessionResult::Next.is_terminal());
        for result in [
            SessionResult::Success,
            SessionResult::Failed("x".into()),
            SessionResult::Cancelled,
            SessionResult::Busy,
            SessionResult::ArmedRejection,
            SessionResult::NoDevice,
            SessionResult::ConnectionError,
            SessionResult::CommandDenied,
            SessionResult::Unsupported,
            SessionResult::Timeout,
            SessionResult::UnknownError,
        ] {
            assert!(result.is_terminal(), "{:?} should be terminal", result);
        }
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(ProgressReport::with_progress(1.7).progress(), Some(1.0));
        assert_eq!(ProgressReport::with_progress(-0.2).progress(), Some(0.0));
        assert!(ProgressReport::with_progress(f32::NAN).is_empty());
    }

    #[test]
    fn test_single_payload() {
        let report = ProgressReport::with_instruction("Center sticks");
        assert_eq!(report.status_text(), Some("Center sticks"));
        assert_eq!(report.progress(), None);
    }

    #[test]
    fn test_display_failed_reason() {
        let result = SessionResult::Failed("stick not centered".into());
        assert_eq!(result.to_string(), "Calibration failed: stick not centered");
    }
}
