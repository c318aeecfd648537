//! Statustext classifier for calibration diagnostics
//!
//! The autopilot reports calibration progress through short, free-form
//! status lines tagged with a marker, e.g.:
//!
//! ```text
//! [cal] calibration started: 2 rc
//! [cal] Center all sticks and switches
//! [cal] progress <45>
//! [cal] calibration failed: stick not centered
//! [cal] calibration done: rc
//! ```
//!
//! Each line is judged on its own. The classifier keeps no memory between
//! calls and never fails: anything it does not understand is
//! [`DiagnosticEvent::None`].

use serde::{Deserialize, Serialize};

/// Maximum number of characters in one status line
pub const MAX_STATUSTEXT_LEN: usize = 63;

/// Marker tag used by the autopilot's calibration subsystem
pub const DEFAULT_MARKER: &str = "[cal]";

/// Status line as received from the device, bounded to [`MAX_STATUSTEXT_LEN`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawDiagnosticLine(String);

impl RawDiagnosticLine {
    /// Create a line, truncating anything past the bound
    pub fn new(text: &str) -> Self {
        match text.char_indices().nth(MAX_STATUSTEXT_LEN) {
            Some((end, _)) => Self(text[..end].to_string()),
            None => Self(text.to_string()),
        }
    }

    /// Create a line from a NUL-padded wire buffer
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Self::new(&String::from_utf8_lossy(&bytes[..end]))
    }

    /// Line text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the line is blank
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for RawDiagnosticLine {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl AsRef<str> for RawDiagnosticLine {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Classified status line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// Not a calibration line, or not understood
    None,
    /// Calibration started on the device
    Started,
    /// Calibration finished successfully
    Done,
    /// Calibration failed, with the device's reason
    Failed(String),
    /// Calibration was cancelled on the device
    Cancelled,
    /// Completion fraction in `[0, 1]`
    Progress(f32),
    /// Instruction for the user
    Instruction(String),
}

impl DiagnosticEvent {
    /// Check if this event ends a calibration
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Cancelled)
    }
}

/// Classifies status lines carrying a given marker tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatustextClassifier {
    marker: String,
}

impl Default for StatustextClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl StatustextClassifier {
    /// Create a classifier for the given marker tag
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Marker tag this classifier looks for
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Classify a text, truncating it to the line bound first
    pub fn classify_str(&self, text: &str) -> DiagnosticEvent {
        self.classify(&RawDiagnosticLine::new(text))
    }

    /// Classify one status line
    pub fn classify(&self, line: &RawDiagnosticLine) -> DiagnosticEvent {
        let text = line.as_str().trim();
        if text.is_empty() {
            return DiagnosticEvent::None;
        }

        let Some(body) = self.body(text) else {
            return DiagnosticEvent::None;
        };
        if body.is_empty() {
            return DiagnosticEvent::None;
        }

        // "[cal] calibration done: rc" and "[cal] done" carry the same token
        let (mut head, mut rest) = split_token(body);
        let status_line = head.eq_ignore_ascii_case("calibration");
        if status_line {
            (head, rest) = split_token(rest.trim_start());
        }

        let token = head.to_ascii_lowercase();
        match token.as_str() {
            "started" => DiagnosticEvent::Started,
            "done" | "completed" => DiagnosticEvent::Done,
            "cancelled" | "canceled" | "aborted" => DiagnosticEvent::Cancelled,
            "failed" => DiagnosticEvent::Failed(strip_separator(rest).trim_end().to_string()),
            "progress" => parse_progress(rest)
                .map(DiagnosticEvent::Progress)
                .unwrap_or(DiagnosticEvent::None),
            // Status line with an unknown or truncated token
            _ if status_line => DiagnosticEvent::None,
            _ if body.starts_with(|c: char| c.is_alphabetic()) => {
                DiagnosticEvent::Instruction(body.to_string())
            }
            _ => DiagnosticEvent::None,
        }
    }

    /// Text following the marker, if the line carries it
    fn body<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.marker.is_empty() {
            return Some(text);
        }
        text.find(&self.marker)
            .map(|pos| text[pos + self.marker.len()..].trim())
    }
}

/// Classify a line with the default `[cal]` marker
pub fn classify(text: &str) -> DiagnosticEvent {
    StatustextClassifier::default().classify_str(text)
}

/// Split off the leading run of ASCII letters
///
/// The token ends at whitespace or punctuation, so `failed:reason` and
/// `done.` carry the tokens `failed` and `done`.
fn split_token(text: &str) -> (&str, &str) {
    let end = text
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    text.split_at(end)
}

/// Drop the `:` and whitespace between a token and its argument
fn strip_separator(rest: &str) -> &str {
    rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace())
}

/// Parse "45", "<45>" or "45%" as a fraction of 100
fn parse_progress(rest: &str) -> Option<f32> {
    let value = strip_separator(rest).split_whitespace().next()?;
    let value = value
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_end_matches('%');

    let percent: f32 = value.parse().ok()?;
    if !percent.is_finite() {
        return None;
    }
    Some((percent / 100.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_progress(event: DiagnosticEvent, expected: f32) {
        match event {
            DiagnosticEvent::Progress(value) => {
                assert!((value - expected).abs() < 1e-6, "got {}", value)
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[test]
    fn test_progress_percentages() {
        assert_progress(classify("[cal] progress 45"), 0.45);
        assert_progress(classify("[cal] progress <50>"), 0.5);
        assert_progress(classify("[cal] progress 100%"), 1.0);
        assert_progress(classify("[cal] progress 250"), 1.0);
        assert_progress(classify("[cal] progress -5"), 0.0);
    }

    #[test]
    fn test_malformed_progress_is_none() {
        assert_eq!(classify("[cal] progress abc"), DiagnosticEvent::None);
        assert_eq!(classify("[cal] progress"), DiagnosticEvent::None);
        assert_eq!(classify("[cal] progress <"), DiagnosticEvent::None);
        assert_eq!(classify("[cal] progress NaN"), DiagnosticEvent::None);
    }

    #[test]
    fn test_irrelevant_lines() {
        assert_eq!(classify(""), DiagnosticEvent::None);
        assert_eq!(classify("   \t "), DiagnosticEvent::None);
        assert_eq!(classify("[unrelated] done"), DiagnosticEvent::None);
        assert_eq!(classify("[cal]"), DiagnosticEvent::None);
        // marker match is case-sensitive
        assert_eq!(classify("[CAL] done"), DiagnosticEvent::None);
    }

    #[test]
    fn test_status_tokens() {
        assert_eq!(classify("[cal] started"), DiagnosticEvent::Started);
        assert_eq!(classify("[cal] calibration started: 2 rc"), DiagnosticEvent::Started);
        assert_eq!(classify("[cal] done"), DiagnosticEvent::Done);
        assert_eq!(classify("[cal] calibration done: rc"), DiagnosticEvent::Done);
        assert_eq!(classify("[cal] completed"), DiagnosticEvent::Done);
        assert_eq!(classify("[cal] calibration cancelled"), DiagnosticEvent::Cancelled);
        assert_eq!(classify("[cal] aborted"), DiagnosticEvent::Cancelled);
        assert_eq!(classify("  [cal] Calibration DONE: rc\r\n"), DiagnosticEvent::Done);
    }

    #[test]
    fn test_failed_reason() {
        assert_eq!(
            classify("[cal] failed: stick not centered"),
            DiagnosticEvent::Failed("stick not centered".into())
        );
        assert_eq!(
            classify("[cal] calibration failed: not done yet"),
            DiagnosticEvent::Failed("not done yet".into())
        );
        assert_eq!(classify("[cal] failed"), DiagnosticEvent::Failed(String::new()));
    }

    #[test]
    fn test_token_ends_at_punctuation() {
        assert_eq!(
            classify("[cal] failed:stick not centered"),
            DiagnosticEvent::Failed("stick not centered".into())
        );
        assert_eq!(
            classify("[cal] calibration failed:no rc"),
            DiagnosticEvent::Failed("no rc".into())
        );
        assert_eq!(classify("[cal] done."), DiagnosticEvent::Done);
        assert_eq!(classify("[cal] Done!"), DiagnosticEvent::Done);
        assert_eq!(classify("[cal] calibration cancelled."), DiagnosticEvent::Cancelled);
        assert_progress(classify("[cal] progress:45"), 0.45);
        assert_eq!(
            classify("[cal] Doneness check pending"),
            DiagnosticEvent::Instruction("Doneness check pending".into())
        );
    }

    #[test]
    fn test_instruction() {
        assert_eq!(
            classify("[cal] Center all sticks and switches"),
            DiagnosticEvent::Instruction("Center all sticks and switches".into())
        );
        assert_eq!(classify("[cal] 42 things"), DiagnosticEvent::None);
    }

    #[test]
    fn test_truncated_status_token_is_none() {
        assert_eq!(classify("[cal] calibration sta"), DiagnosticEvent::None);
        assert_eq!(classify("[cal] calibration"), DiagnosticEvent::None);
    }

    #[test]
    fn test_long_line_is_truncated() {
        let reason = "x".repeat(100);
        let line = format!("[cal] failed: {}", reason);
        match classify(&line) {
            DiagnosticEvent::Failed(msg) => {
                assert_eq!(msg.len(), MAX_STATUSTEXT_LEN - "[cal] failed: ".len());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_line_from_wire_buffer() {
        let mut buf = [0u8; 50];
        buf[..13].copy_from_slice(b"[cal] started");
        let line = RawDiagnosticLine::from_bytes(&buf);
        assert_eq!(line.as_str(), "[cal] started");

        let full = [b'a'; 80];
        assert_eq!(RawDiagnosticLine::from_bytes(&full).as_str().len(), MAX_STATUSTEXT_LEN);
    }

    #[test]
    fn test_custom_marker() {
        let classifier = StatustextClassifier::new("[rc]");
        assert_eq!(classifier.classify_str("[rc] done"), DiagnosticEvent::Done);
        assert_eq!(classifier.classify_str("[cal] done"), DiagnosticEvent::None);
    }

    #[test]
    fn test_terminal_events() {
        assert!(DiagnosticEvent::Done.is_terminal());
        assert!(DiagnosticEvent::Cancelled.is_terminal());
        assert!(DiagnosticEvent::Failed(String::new()).is_terminal());
        assert!(!DiagnosticEvent::Started.is_terminal());
        assert!(!DiagnosticEvent::Progress(0.5).is_terminal());
    }
}
