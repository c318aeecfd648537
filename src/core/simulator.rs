//! Simulated vehicle
//!
//! A scriptable stand-in for an autopilot that answers calibration commands
//! and emits calibration status lines. Used by the CLI and by tests.
//!
//! The channel can be made lossy: status lines may be delayed, dropped or
//! duplicated, and unrelated chatter can be interleaved.

use super::command::{CommandLong, CommandResult};
use super::link::{CommandResultCallback, HandlerId, StatustextHandler, VehicleLink};
use super::statustext::RawDiagnosticLine;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Created outside a Tokio runtime
    #[error("Simulated vehicle needs a Tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// How the simulated autopilot reports progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareGeneration {
    /// Acknowledges once, then reports through status lines only
    #[default]
    Legacy,
    /// Additionally sends `InProgress` acks carrying a fraction
    ProgressAck,
}

/// How the simulated autopilot acknowledges a calibration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckBehavior {
    /// Accept and run the script
    #[default]
    Accept,
    /// Answer with the given result and do nothing else
    Respond(CommandResult),
    /// Never answer
    Silent,
}

/// How the scripted calibration ends
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOutcome {
    /// Report `calibration done`
    #[default]
    Success,
    /// Report `calibration failed` with a reason
    Failure(String),
    /// Stop talking without a final line
    Stall,
}

/// Latency applied to every simulated answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Base latency in ms
    pub base_ms: u64,
    /// Random extra latency in ms, uniformly distributed
    pub jitter_ms: u64,
}

impl LatencyConfig {
    /// Pick the latency for one answer
    pub fn sample(&self) -> Duration {
        use rand::Rng;

        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.base_ms.saturating_add(jitter))
    }
}

/// Simulated vehicle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Vehicle starts armed
    pub armed: bool,
    /// Progress reporting style
    pub firmware: FirmwareGeneration,
    /// Answer to a calibration request
    pub ack: AckBehavior,
    /// How the calibration ends
    pub outcome: ScriptOutcome,
    /// Pause between two scripted status lines (ms)
    pub step_interval_ms: u64,
    /// Probability that a status line is lost (0.0 - 1.0)
    pub drop_probability: f32,
    /// Probability that a status line is delivered twice (0.0 - 1.0)
    pub duplicate_probability: f32,
    /// Interleave status lines of unrelated subsystems
    pub chatter: bool,
    /// Answer latency
    pub latency: LatencyConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            armed: false,
            firmware: FirmwareGeneration::Legacy,
            ack: AckBehavior::Accept,
            outcome: ScriptOutcome::Success,
            step_interval_ms: 400,
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            chatter: true,
            latency: LatencyConfig { base_ms: 20, jitter_ms: 30 },
        }
    }
}

impl SimulatorConfig {
    /// Fast, lossless configuration for tests
    pub fn instant() -> Self {
        Self {
            step_interval_ms: 1,
            latency: LatencyConfig::default(),
            chatter: false,
            ..Self::default()
        }
    }

    /// Status lines of one radio calibration
    pub fn script(&self) -> Vec<String> {
        let mut lines: Vec<String> = [
            "[cal] calibration started: 2 rc",
            "[cal] Center all sticks and switches",
            "[cal] progress <10>",
            "[cal] Move all sticks to their extremes",
            "[cal] progress <40>",
            "[cal] progress <70>",
            "[cal] Move all switches through their range",
            "[cal] progress <100>",
        ]
        .iter()
        .map(|line| line.to_string())
        .collect();

        match &self.outcome {
            ScriptOutcome::Success => lines.push("[cal] calibration done: rc".to_string()),
            ScriptOutcome::Failure(reason) => {
                lines.push(format!("[cal] calibration failed: {}", reason))
            }
            ScriptOutcome::Stall => {}
        }
        lines
    }
}

const CHATTER: &[&str] = &[
    "[ecl] EKF aligned, (baro hgt, IMU buf: 22, OBS buf: 14)",
    "[commander] Preflight Fail: No manual control input",
    "[logger] Opened full log file",
    "[mavlink] partner IP: 127.0.0.1",
];

struct VehicleInner {
    config: SimulatorConfig,
    armed: AtomicBool,
    handlers: RwLock<HashMap<HandlerId, StatustextHandler>>,
    commands: RwLock<Vec<CommandLong>>,
    param_changes: RwLock<Vec<String>>,
    script: Mutex<Option<JoinHandle<()>>>,
}

impl VehicleInner {
    /// Deliver a line to every handler, subject to loss and duplication
    fn emit(&self, text: &str) {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        if rng.gen::<f32>() < self.config.drop_probability {
            tracing::debug!(line = text, "Simulated vehicle dropped status line");
            return;
        }
        let copies = if rng.gen::<f32>() < self.config.duplicate_probability { 2 } else { 1 };

        let line = RawDiagnosticLine::new(text);
        let handlers: Vec<StatustextHandler> = self.handlers.read().values().cloned().collect();
        for _ in 0..copies {
            for handler in &handlers {
                handler(&line);
            }
        }
    }

    fn script_running(&self) -> bool {
        self.script
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

/// In-process vehicle answering calibration commands on a Tokio runtime
pub struct SimulatedVehicle {
    inner: Arc<VehicleInner>,
    runtime: Handle,
}

impl SimulatedVehicle {
    /// Create a vehicle on the current Tokio runtime
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        Ok(Self::with_runtime(config, Handle::try_current()?))
    }

    /// Create a vehicle on an explicit runtime
    pub fn with_runtime(config: SimulatorConfig, runtime: Handle) -> Self {
        let armed = AtomicBool::new(config.armed);
        Self {
            inner: Arc::new(VehicleInner {
                config,
                armed,
                handlers: RwLock::new(HashMap::new()),
                commands: RwLock::new(Vec::new()),
                param_changes: RwLock::new(Vec::new()),
                script: Mutex::new(None),
            }),
            runtime,
        }
    }

    /// Configuration the vehicle runs with
    pub fn config(&self) -> &SimulatorConfig {
        &self.inner.config
    }

    /// Arm or disarm
    pub fn set_armed(&self, armed: bool) {
        self.inner.armed.store(armed, Ordering::SeqCst);
    }

    /// Emit an arbitrary status line
    pub fn emit_statustext(&self, text: &str) {
        self.inner.emit(text);
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<CommandLong> {
        self.inner.commands.read().clone()
    }

    /// Every parameter-change notification received so far
    pub fn param_changes(&self) -> Vec<String> {
        self.inner.param_changes.read().clone()
    }

    /// Check if a calibration script is running
    pub fn is_calibrating(&self) -> bool {
        self.inner.script_running()
    }

    fn start_calibration(&self, mut on_result: Option<CommandResultCallback>) {
        let inner = self.inner.clone();

        if inner.script_running() {
            self.runtime.spawn(async move {
                tokio::time::sleep(inner.config.latency.sample()).await;
                if let Some(cb) = on_result.as_mut() {
                    cb(CommandResult::Busy, f32::NAN);
                }
            });
            return;
        }

        let task = self.runtime.spawn(async move {
            let config = &inner.config;
            tokio::time::sleep(config.latency.sample()).await;

            match config.ack {
                AckBehavior::Silent => return,
                AckBehavior::Respond(result) => {
                    if let Some(cb) = on_result.as_mut() {
                        cb(result, f32::NAN);
                    }
                    return;
                }
                AckBehavior::Accept => {}
            }

            let progress_acks = config.firmware == FirmwareGeneration::ProgressAck;
            if let Some(cb) = on_result.as_mut() {
                if progress_acks {
                    cb(CommandResult::InProgress, 0.0);
                } else {
                    cb(CommandResult::Success, f32::NAN);
                }
            }

            let script = config.script();
            let total = script.len() as f32;
            for (i, line) in script.iter().enumerate() {
                tokio::time::sleep(Duration::from_millis(config.step_interval_ms)).await;
                if config.chatter {
                    inner.emit(CHATTER[i % CHATTER.len()]);
                }
                inner.emit(line);

                if progress_acks {
                    if let Some(cb) = on_result.as_mut() {
                        cb(CommandResult::InProgress, (i + 1) as f32 / total);
                    }
                }
            }

            if progress_acks && config.outcome != ScriptOutcome::Stall {
                if let Some(cb) = on_result.as_mut() {
                    cb(CommandResult::Success, 1.0);
                }
            }
        });

        *self.inner.script.lock() = Some(task);
    }

    fn cancel_calibration(&self, mut on_result: Option<CommandResultCallback>) {
        let task = self.inner.script.lock().take();
        let was_running = task.as_ref().is_some_and(|task| !task.is_finished());
        if let Some(task) = task {
            task.abort();
        }

        let inner = self.inner.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(inner.config.latency.sample()).await;
            if let Some(cb) = on_result.as_mut() {
                let result = if was_running { CommandResult::Success } else { CommandResult::CommandDenied };
                cb(result, f32::NAN);
            }
            if was_running {
                inner.emit("[cal] calibration cancelled");
            }
        });
    }
}

impl VehicleLink for SimulatedVehicle {
    fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    fn send_command(&self, command: CommandLong, mut on_result: Option<CommandResultCallback>) {
        self.inner.commands.write().push(command);

        if command.is_calibration_cancel() {
            self.cancel_calibration(on_result);
        } else if command.is_radio_calibration() {
            self.start_calibration(on_result);
        } else {
            let latency = self.inner.config.latency.sample();
            self.runtime.spawn(async move {
                tokio::time::sleep(latency).await;
                if let Some(cb) = on_result.as_mut() {
                    cb(CommandResult::Unsupported, f32::NAN);
                }
            });
        }
    }

    fn register_statustext_handler(&self, handler: StatustextHandler) -> HandlerId {
        let id = HandlerId::new();
        self.inner.handlers.write().insert(id, handler);
        id
    }

    fn unregister_statustext_handler(&self, id: HandlerId) {
        self.inner.handlers.write().remove(&id);
    }

    fn param_changed(&self, name: &str) {
        tracing::debug!(param = name, "Simulated vehicle parameter changed");
        self.inner.param_changes.write().push(name.to_string());
    }
}
