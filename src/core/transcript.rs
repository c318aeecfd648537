//! Calibration transcript
//!
//! Records what happened during a calibration: commands sent, acks
//! received, status lines seen and updates delivered. Entries are kept in
//! memory and optionally written to a file as text or JSON lines.

use super::command::{CommandLong, CommandResult};
use super::link::{CommandResultCallback, HandlerId, StatustextHandler, VehicleLink};
use super::result::{ProgressReport, SessionResult};
use super::statustext::RawDiagnosticLine;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Transcript shared between the link wrapper and the front-end
pub type SharedTranscript = Arc<Mutex<Transcript>>;

/// Transcript errors
#[derive(Debug, Error)]
pub enum TranscriptError {
    /// Writing the file failed
    #[error("Transcript I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be encoded as JSON
    #[error("Transcript encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transcript file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    /// One human-readable line per entry
    #[default]
    Text,
    /// One JSON object per line
    JsonLines,
}

impl TranscriptFormat {
    /// Get file extension for format
    pub fn extension(&self) -> &'static str {
        match self {
            TranscriptFormat::Text => "txt",
            TranscriptFormat::JsonLines => "jsonl",
        }
    }
}

/// What an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Command handed to the link
    Command,
    /// Command result from the link
    Ack,
    /// Status line from the device
    Statustext,
    /// Update delivered to the user
    Update,
    /// Anything else
    Info,
}

impl EntryKind {
    fn tag(&self) -> &'static str {
        match self {
            EntryKind::Command => "TX",
            EntryKind::Ack => "ACK",
            EntryKind::Statustext => "RX",
            EntryKind::Update => "CB",
            EntryKind::Info => "##",
        }
    }
}

/// A single transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Local time the entry was recorded
    pub timestamp: DateTime<Local>,
    /// What the entry records
    pub kind: EntryKind,
    /// Human-readable payload
    pub text: String,
}

impl TranscriptEntry {
    /// Create new entry stamped now
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            text: text.into(),
        }
    }

    /// Format as text
    pub fn to_text(&self) -> String {
        format!(
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.kind.tag(),
            self.text
        )
    }

    /// Format as JSON line
    pub fn to_json(&self) -> Result<String, TranscriptError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Calibration transcript
#[derive(Default)]
pub struct Transcript {
    file: Option<BufWriter<File>>,
    format: TranscriptFormat,
    path: Option<PathBuf>,
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// In-memory transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript that also appends to `path`
    pub fn create(path: impl AsRef<Path>, format: TranscriptFormat) -> Result<Self, TranscriptError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            file: Some(BufWriter::new(file)),
            format,
            path: Some(path),
            entries: Vec::new(),
        })
    }

    /// Wrap for sharing
    pub fn shared(self) -> SharedTranscript {
        Arc::new(Mutex::new(self))
    }

    /// Output file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Everything recorded so far
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Append an entry
    pub fn record(&mut self, kind: EntryKind, text: impl Into<String>) {
        let entry = TranscriptEntry::new(kind, text);

        if let Some(file) = self.file.as_mut() {
            let line = match self.format {
                TranscriptFormat::Text => Ok(entry.to_text()),
                TranscriptFormat::JsonLines => entry.to_json(),
            };
            let written = line.and_then(|line| Ok(writeln!(file, "{}", line)?));
            if let Err(e) = written {
                tracing::warn!(error = %e, "Failed to write transcript entry");
            }
        }

        self.entries.push(entry);
    }

    /// Record a command handed to the link
    pub fn record_command(&mut self, command: &CommandLong) {
        self.record(
            EntryKind::Command,
            format!(
                "command {} -> component {} params {:?}",
                command.command, command.target_component, command.params
            ),
        );
    }

    /// Record a command result; non-finite progress is omitted
    pub fn record_ack(&mut self, result: CommandResult, progress: f32) {
        let text = if progress.is_finite() {
            format!("{:?} progress {:.2}", result, progress)
        } else {
            format!("{:?}", result)
        };
        self.record(EntryKind::Ack, text);
    }

    /// Record a status line
    pub fn record_line(&mut self, line: &RawDiagnosticLine) {
        self.record(EntryKind::Statustext, line.as_str());
    }

    /// Record an update delivered to the user
    pub fn record_update(&mut self, result: &SessionResult, report: &ProgressReport) {
        let mut text = result.to_string();
        if let Some(progress) = report.progress() {
            text.push_str(&format!(" {:.0}%", progress * 100.0));
        }
        if let Some(status) = report.status_text() {
            text.push_str(&format!(" \"{}\"", status));
        }
        self.record(EntryKind::Update, text);
    }

    /// Flush to disk
    pub fn flush(&mut self) -> Result<(), TranscriptError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for Transcript {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Generate transcript filename with timestamp
pub fn generate_transcript_filename(prefix: &str, format: TranscriptFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", prefix, timestamp, format.extension())
}

/// Link wrapper that records traffic into a transcript
pub struct TranscribingLink {
    inner: Arc<dyn VehicleLink>,
    transcript: SharedTranscript,
}

impl TranscribingLink {
    /// Wrap `inner`, recording into `transcript`
    pub fn new(inner: Arc<dyn VehicleLink>, transcript: SharedTranscript) -> Self {
        Self { inner, transcript }
    }

    /// Transcript being written
    pub fn transcript(&self) -> &SharedTranscript {
        &self.transcript
    }
}

impl VehicleLink for TranscribingLink {
    fn is_armed(&self) -> bool {
        self.inner.is_armed()
    }

    fn send_command(&self, command: CommandLong, on_result: Option<CommandResultCallback>) {
        self.transcript.lock().record_command(&command);

        let on_result = on_result.map(|mut cb| {
            let transcript = self.transcript.clone();
            Box::new(move |result: CommandResult, progress: f32| {
                transcript.lock().record_ack(result, progress);
                cb(result, progress);
            }) as CommandResultCallback
        });
        self.inner.send_command(command, on_result);
    }

    fn register_statustext_handler(&self, handler: StatustextHandler) -> HandlerId {
        let transcript = self.transcript.clone();
        self.inner
            .register_statustext_handler(Arc::new(move |line: &RawDiagnosticLine| {
                transcript.lock().record_line(line);
                handler(line);
            }))
    }

    fn unregister_statustext_handler(&self, id: HandlerId) {
        self.inner.unregister_statustext_handler(id);
    }

    fn param_changed(&self, name: &str) {
        self.transcript
            .lock()
            .record(EntryKind::Info, format!("parameter {} may have changed", name));
        self.inner.param_changed(name);
    }
}
