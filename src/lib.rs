//! # Radiocal Core Library
//!
//! Radio controller calibration over a MAVLink-style vehicle link:
//! - Starts and cancels the calibration on the autopilot
//! - Follows the calibration through `[cal]` status lines
//! - Folds command acknowledgements and status lines into one stream of
//!   progress updates ending in exactly one outcome
//!
//! ## Features
//!
//! - Status line classifier for the `[cal]` protocol
//! - Command result translation for old and new firmware
//! - Simulated vehicle with lossy channel and scripted calibrations
//! - Transcripts in text or JSON lines
//! - CLI with exit codes and JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use radiocal_core::{CalibrationSession, SessionResult, SimulatedVehicle, SimulatorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let vehicle = Arc::new(SimulatedVehicle::new(SimulatorConfig::default())?);
//!     let session = CalibrationSession::new(vehicle);
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     session.start(move |result, report| {
//!         let _ = tx.send((result, report));
//!     });
//!
//!     while let Some((result, report)) = rx.recv().await {
//!         println!("{} {:?}", result, report);
//!         if result != SessionResult::Next {
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::command::{translate_command_result, CommandLong, CommandResult, Translation};
pub use crate::core::link::{HandlerId, VehicleLink};
pub use crate::core::result::{ProgressReport, SessionResult};
pub use crate::core::session::{CalibrationSession, CalibrationSettings, CalibrationState};
pub use crate::core::simulator::{FirmwareGeneration, SimulatedVehicle, SimulatorConfig};
pub use crate::core::statustext::{classify, DiagnosticEvent, RawDiagnosticLine, StatustextClassifier};
pub use crate::core::transcript::{Transcript, TranscriptFormat};
pub use crate::utils::logging::init_logging;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
