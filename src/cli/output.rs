//! Output rendering for the command-line front-end
//!
//! Text output follows the classic calibration console: progress lines,
//! instructions, and one closing line with the outcome. JSON output emits
//! one object per line for scripting.

use crate::core::result::{ProgressReport, SessionResult};
use crate::core::statustext::DiagnosticEvent;
use serde_json::json;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Render one calibration update
pub fn format_update(result: &SessionResult, report: &ProgressReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => update_text(result, report),
        OutputFormat::Json => {
            let mut value = json!({ "result": result.name() });
            if let SessionResult::Failed(reason) = result {
                value["reason"] = json!(reason);
            }
            if let Some(progress) = report.progress() {
                value["progress"] = json!(progress);
            }
            if let Some(text) = report.status_text() {
                value["status_text"] = json!(text);
            }
            value.to_string()
        }
    }
}

fn update_text(result: &SessionResult, report: &ProgressReport) -> String {
    match result {
        SessionResult::Next => {
            if let Some(progress) = report.progress() {
                format!("    Progress: {:.0}%", progress * 100.0)
            } else if let Some(text) = report.status_text() {
                format!("    Instruction: {}", text)
            } else {
                "    Working...".to_string()
            }
        }
        SessionResult::Success => "--- Calibration succeeded!".to_string(),
        other => format!("--- Calibration failed with: {}", other),
    }
}

/// Render a classified status line
pub fn format_classification(line: &str, event: &DiagnosticEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let label = match event {
                DiagnosticEvent::None => "none".to_string(),
                DiagnosticEvent::Started => "started".to_string(),
                DiagnosticEvent::Done => "done".to_string(),
                DiagnosticEvent::Cancelled => "cancelled".to_string(),
                DiagnosticEvent::Failed(reason) => format!("failed({})", reason),
                DiagnosticEvent::Progress(fraction) => format!("progress({:.2})", fraction),
                DiagnosticEvent::Instruction(text) => format!("instruction({})", text),
            };
            format!("{:<24} {}", label, line)
        }
        OutputFormat::Json => json!({ "line": line, "classification": event }).to_string(),
    }
}
