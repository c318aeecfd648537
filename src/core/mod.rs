//! Core module containing the calibration logic of Radiocal
//!
//! This module provides:
//! - Status line classification (`[cal]` protocol)
//! - Command construction and command-result translation
//! - The calibration session state machine
//! - Ordered delivery of user callbacks
//! - The vehicle link boundary
//! - A simulated vehicle for headless runs and tests
//! - Calibration transcripts with timestamps

pub mod callback;
pub mod command;
pub mod link;
pub mod result;
pub mod session;
pub mod simulator;
pub mod statustext;
pub mod transcript;
