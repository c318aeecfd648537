//! Radio calibration session
//!
//! A [`CalibrationSession`] arbitrates start and cancel requests and folds
//! two independent inbound streams into one outcome:
//!
//! - command results from the command engine, and
//! - status lines from the device.
//!
//! Both streams go through the same lock and the same state, so the rule
//! "exactly one terminal callback per started calibration" is enforced in a
//! single place. The callback is cleared in the same critical section that
//! decides the calibration is over, which turns any late event into a no-op.

use super::callback::CallbackQueue;
use super::command::{translate_command_result, CommandLong, CommandResult, Translation, AUTOPILOT_COMPONENT_ID};
use super::link::{HandlerId, VehicleLink};
use super::result::{ProgressReport, SessionResult};
use super::statustext::{DiagnosticEvent, RawDiagnosticLine, StatustextClassifier, DEFAULT_MARKER};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Parameter the parameter cache is told about after a calibration ends
pub const DEFAULT_PARAM_CHANGED: &str = "CAL_GYRO0_ID";

/// User callback receiving calibration updates
pub type CalibrationCallback = Arc<dyn Fn(SessionResult, ProgressReport) + Send + Sync + 'static>;

/// Whether a calibration is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationState {
    /// No calibration running
    Idle,
    /// A calibration is in flight
    Active,
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Marker tag of calibration status lines
    pub marker: String,
    /// Parameter reported as changed when a calibration ends
    pub param_changed: String,
    /// Component calibration commands are addressed to
    pub target_component: u8,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            param_changed: DEFAULT_PARAM_CHANGED.to_string(),
            target_component: AUTOPILOT_COMPONENT_ID,
        }
    }
}

struct Attempt {
    id: Uuid,
    callback: CalibrationCallback,
    started: Instant,
}

/// Session slot; the callback exists exactly while a calibration is active
enum Slot {
    Idle,
    Active(Attempt),
}

impl Slot {
    fn attempt(&self) -> Option<&Attempt> {
        match self {
            Self::Idle => None,
            Self::Active(attempt) => Some(attempt),
        }
    }

    fn take(&mut self) -> Option<Attempt> {
        match std::mem::replace(self, Self::Idle) {
            Self::Idle => None,
            Self::Active(attempt) => Some(attempt),
        }
    }
}

struct Shared {
    link: Arc<dyn VehicleLink>,
    classifier: StatustextClassifier,
    settings: CalibrationSettings,
    callbacks: CallbackQueue,
    slot: Mutex<Slot>,
    /// Held from a start/cancel decision until its command is handed to the
    /// link, so commands reach the link in decision order
    outbound: Mutex<()>,
}

/// One radio calibration at a time over a vehicle link
///
/// Creating a session subscribes it to the link's status lines; dropping it
/// unsubscribes again.
pub struct CalibrationSession {
    shared: Arc<Shared>,
    handler_id: HandlerId,
}

impl CalibrationSession {
    /// Create a session with default settings
    pub fn new(link: Arc<dyn VehicleLink>) -> Self {
        Self::with_settings(link, CalibrationSettings::default())
    }

    /// Create a session with custom settings
    pub fn with_settings(link: Arc<dyn VehicleLink>, settings: CalibrationSettings) -> Self {
        let shared = Arc::new(Shared {
            link: link.clone(),
            classifier: StatustextClassifier::new(settings.marker.clone()),
            settings,
            callbacks: CallbackQueue::new(),
            slot: Mutex::new(Slot::Idle),
            outbound: Mutex::new(()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let handler_id = link.register_statustext_handler(Arc::new(move |line: &RawDiagnosticLine| {
            if let Some(shared) = weak.upgrade() {
                shared.process_statustext(line);
            }
        }));

        Self { shared, handler_id }
    }

    /// Current state
    pub fn state(&self) -> CalibrationState {
        match self.shared.slot.lock().attempt() {
            Some(_) => CalibrationState::Active,
            None => CalibrationState::Idle,
        }
    }

    /// Check if a calibration is running
    pub fn is_active(&self) -> bool {
        self.state() == CalibrationState::Active
    }

    /// Id of the running calibration, if any
    pub fn current_attempt(&self) -> Option<Uuid> {
        self.shared.slot.lock().attempt().map(|attempt| attempt.id)
    }

    /// Settings this session was created with
    pub fn settings(&self) -> &CalibrationSettings {
        &self.shared.settings
    }

    /// Start a radio calibration
    ///
    /// An armed vehicle yields `ArmedRejection` and a running calibration
    /// yields `Busy`; both are delivered to `callback` before this returns
    /// and leave the session untouched. Otherwise the calibration command is
    /// sent and all further updates arrive through `callback`.
    pub fn start<F>(&self, callback: F)
    where
        F: Fn(SessionResult, ProgressReport) + Send + Sync + 'static,
    {
        Shared::start(&self.shared, Arc::new(callback));
    }

    /// Ask the device to cancel the running calibration
    ///
    /// The outcome arrives through the callback given to [`start`](Self::start).
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Feed a command result not tied to a particular attempt
    pub fn on_command_result(&self, result: CommandResult, progress: f32) {
        self.shared.process_command_result(None, result, progress);
    }

    /// Feed a status line
    pub fn on_diagnostic_line(&self, line: &RawDiagnosticLine) {
        self.shared.process_statustext(line);
    }

    /// Block until every callback decided so far has been delivered
    pub fn wait_for_callbacks(&self) {
        self.shared.callbacks.flush();
    }
}

impl Drop for CalibrationSession {
    fn drop(&mut self) {
        self.shared.link.unregister_statustext_handler(self.handler_id);
        self.shared.callbacks.flush();
    }
}

impl Shared {
    fn start(shared: &Arc<Self>, callback: CalibrationCallback) {
        if shared.link.is_armed() {
            warn!("Refusing radio calibration, vehicle is armed");
            callback(SessionResult::ArmedRejection, ProgressReport::empty());
            return;
        }

        let outbound = shared.outbound.lock();
        let id = {
            let mut slot = shared.slot.lock();
            if slot.attempt().is_some() {
                None
            } else {
                let id = Uuid::new_v4();
                *slot = Slot::Active(Attempt {
                    id,
                    callback: callback.clone(),
                    started: Instant::now(),
                });
                Some(id)
            }
        };

        let Some(id) = id else {
            drop(outbound);
            warn!("Radio calibration already in progress");
            callback(SessionResult::Busy, ProgressReport::empty());
            return;
        };

        info!(attempt = %id, "Starting radio calibration");
        let weak = Arc::downgrade(shared);
        let command = CommandLong::start_radio_calibration(shared.settings.target_component);
        shared.link.send_command(
            command,
            Some(Box::new(move |result: CommandResult, progress: f32| {
                if let Some(shared) = weak.upgrade() {
                    shared.process_command_result(Some(id), result, progress);
                }
            })),
        );
        drop(outbound);
    }

    fn cancel(&self) {
        let _outbound = self.outbound.lock();
        let id = self.slot.lock().attempt().map(|attempt| attempt.id);
        let Some(id) = id else {
            warn!("No calibration to cancel");
            return;
        };

        info!(attempt = %id, "Cancelling radio calibration");
        // The ack is irrelevant; the outcome arrives as statustext
        self.link.send_command(CommandLong::cancel_calibration(self.settings.target_component), None);
    }

    fn process_command_result(&self, expected: Option<Uuid>, result: CommandResult, progress: f32) {
        let mut slot = self.slot.lock();

        // Acks while idle may belong to another client such as a ground station
        let Some(attempt) = slot.attempt() else {
            debug!(?result, "Ignoring command result, no calibration running");
            return;
        };
        let id = attempt.id;
        if expected.is_some_and(|expected| expected != id) {
            debug!(attempt = %id, ?result, "Ignoring command result of an earlier calibration");
            return;
        }

        match translate_command_result(result, progress) {
            Translation::Accepted => {
                debug!(attempt = %id, "Calibration command accepted");
            }
            Translation::Progress(report) => {
                self.deliver(attempt.callback.clone(), SessionResult::Next, report);
            }
            Translation::Terminal(outcome) => {
                warn!(attempt = %id, result = %outcome, "Calibration command failed");
                self.finish(&mut slot, outcome);
            }
        }
    }

    fn process_statustext(&self, line: &RawDiagnosticLine) {
        let event = self.classifier.classify(line);
        {
            let mut slot = self.slot.lock();
            let Some(attempt) = slot.attempt() else {
                return;
            };
            let id = attempt.id;

            match &event {
                DiagnosticEvent::None => {
                    debug!(attempt = %id, line = line.as_str(), "Ignoring status line");
                    return;
                }
                DiagnosticEvent::Started => {
                    self.deliver(attempt.callback.clone(), SessionResult::Next, ProgressReport::with_progress(0.0));
                }
                DiagnosticEvent::Progress(fraction) => {
                    self.deliver(attempt.callback.clone(), SessionResult::Next, ProgressReport::with_progress(*fraction));
                }
                DiagnosticEvent::Instruction(text) => {
                    self.deliver(attempt.callback.clone(), SessionResult::Next, ProgressReport::with_instruction(text.clone()));
                }
                DiagnosticEvent::Done => {
                    self.finish(&mut slot, SessionResult::Success);
                }
                DiagnosticEvent::Failed(reason) => {
                    error!(attempt = %id, "Calibration failed: {}", reason);
                    self.finish(&mut slot, SessionResult::Failed(reason.clone()));
                }
                DiagnosticEvent::Cancelled => {
                    warn!(attempt = %id, "Calibration was cancelled");
                    self.finish(&mut slot, SessionResult::Cancelled);
                }
            }
        }

        // Calibration results are stored in parameters
        if event.is_terminal() {
            self.link.param_changed(&self.settings.param_changed);
        }
    }

    /// End the running calibration with `outcome`
    fn finish(&self, slot: &mut Slot, outcome: SessionResult) {
        if let Some(attempt) = slot.take() {
            info!(
                attempt = %attempt.id,
                result = outcome.name(),
                elapsed_ms = attempt.started.elapsed().as_millis() as u64,
                "Radio calibration finished"
            );
            self.deliver(attempt.callback, outcome, ProgressReport::empty());
        }
    }

    /// Hand a callback invocation to the callback thread
    fn deliver(&self, callback: CalibrationCallback, result: SessionResult, report: ProgressReport) {
        self.callbacks.push(move || callback(result, report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::link::{CommandResultCallback, MockVehicleLink, StatustextHandler};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Updates = Arc<Mutex<Vec<(SessionResult, ProgressReport)>>>;

    #[derive(Default)]
    struct RecordingLink {
        armed: AtomicBool,
        commands: Mutex<Vec<CommandLong>>,
        ack: Mutex<Option<CommandResultCallback>>,
        handlers: Mutex<HashMap<HandlerId, StatustextHandler>>,
        params: Mutex<Vec<String>>,
    }

    impl RecordingLink {
        fn ack(&self, result: CommandResult, progress: f32) {
            let callback = self.ack.lock().take();
            if let Some(mut callback) = callback {
                callback(result, progress);
                *self.ack.lock() = Some(callback);
            }
        }

        fn emit(&self, text: &str) {
            let handlers: Vec<_> = self.handlers.lock().values().cloned().collect();
            let line = RawDiagnosticLine::new(text);
            for handler in handlers {
                handler(&line);
            }
        }
    }

    impl VehicleLink for RecordingLink {
        fn is_armed(&self) -> bool {
            self.armed.load(Ordering::SeqCst)
        }

        fn send_command(&self, command: CommandLong, on_result: Option<CommandResultCallback>) {
            self.commands.lock().push(command);
            if on_result.is_some() {
                *self.ack.lock() = on_result;
            }
        }

        fn register_statustext_handler(&self, handler: StatustextHandler) -> HandlerId {
            let id = HandlerId::new();
            self.handlers.lock().insert(id, handler);
            id
        }

        fn unregister_statustext_handler(&self, id: HandlerId) {
            self.handlers.lock().remove(&id);
        }

        fn param_changed(&self, name: &str) {
            self.params.lock().push(name.to_string());
        }
    }

    fn recorder() -> (Updates, impl Fn(SessionResult, ProgressReport) + Send + Sync + 'static) {
        let updates: Updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        (updates, move |result: SessionResult, report: ProgressReport| {
            sink.lock().push((result, report))
        })
    }

    fn setup() -> (Arc<RecordingLink>, CalibrationSession) {
        let link = Arc::new(RecordingLink::default());
        let session = CalibrationSession::new(link.clone());
        (link, session)
    }

    #[test]
    fn test_full_round_trip() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.start(callback);
        assert!(session.is_active());
        assert_eq!(link.commands.lock().len(), 1);
        assert!(link.commands.lock()[0].is_radio_calibration());

        link.ack(CommandResult::Success, f32::NAN);
        session.wait_for_callbacks();
        assert!(updates.lock().is_empty());
        assert!(session.is_active());

        link.emit("[cal] started");
        link.emit("[cal] progress 50");
        link.emit("[cal] done");
        session.wait_for_callbacks();

        let updates = updates.lock();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0], (SessionResult::Next, ProgressReport::with_progress(0.0)));
        assert_eq!(updates[1], (SessionResult::Next, ProgressReport::with_progress(0.5)));
        assert_eq!(updates[2], (SessionResult::Success, ProgressReport::empty()));
        assert_eq!(session.state(), CalibrationState::Idle);
        assert_eq!(*link.params.lock(), vec![DEFAULT_PARAM_CHANGED.to_string()]);
    }

    #[test]
    fn test_failure_line_is_terminal() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.start(callback);
        link.emit("[cal] failed: stick not centered");
        link.emit("[cal] done");
        session.wait_for_callbacks();

        assert_eq!(
            *updates.lock(),
            vec![(SessionResult::Failed("stick not centered".into()), ProgressReport::empty())]
        );
        assert_eq!(link.params.lock().len(), 1);
        assert!(!session.is_active());
    }

    #[test]
    fn test_unspaced_failure_is_terminal() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.start(callback);
        link.emit("[cal] failed:stick not centered");
        session.wait_for_callbacks();

        assert_eq!(
            *updates.lock(),
            vec![(SessionResult::Failed("stick not centered".into()), ProgressReport::empty())]
        );
        assert!(!session.is_active());
        assert_eq!(link.params.lock().len(), 1);
    }

    /// Link whose start command blocks until the gate opens
    struct GatedLink {
        entered: crossbeam_channel::Sender<()>,
        gate: crossbeam_channel::Receiver<()>,
        commands: Mutex<Vec<CommandLong>>,
    }

    impl VehicleLink for GatedLink {
        fn is_armed(&self) -> bool {
            false
        }

        fn send_command(&self, command: CommandLong, _on_result: Option<CommandResultCallback>) {
            if command.is_radio_calibration() {
                let _ = self.entered.send(());
                let _ = self.gate.recv();
            }
            self.commands.lock().push(command);
        }

        fn register_statustext_handler(&self, _handler: StatustextHandler) -> HandlerId {
            HandlerId::new()
        }

        fn unregister_statustext_handler(&self, _id: HandlerId) {}

        fn param_changed(&self, _name: &str) {}
    }

    #[test]
    fn test_cancel_never_overtakes_start_command() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded(1);
        let link = Arc::new(GatedLink {
            entered: entered_tx,
            gate: gate_rx,
            commands: Mutex::new(Vec::new()),
        });
        let session = CalibrationSession::new(link.clone());
        let (_updates, callback) = recorder();

        std::thread::scope(|scope| {
            scope.spawn(|| session.start(callback));
            entered_rx.recv().unwrap();

            let canceller = scope.spawn(|| session.cancel());
            std::thread::sleep(std::time::Duration::from_millis(20));
            gate_tx.send(()).unwrap();
            canceller.join().unwrap();
        });

        let commands = link.commands.lock();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].is_radio_calibration());
        assert!(commands[1].is_calibration_cancel());
    }

    #[test]
    fn test_instruction_is_forwarded() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.start(callback);
        link.emit("[ecl] EKF aligned");
        link.emit("[cal] Center all sticks and switches");
        session.wait_for_callbacks();

        let updates = updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.status_text(), Some("Center all sticks and switches"));
        assert!(session.is_active());
    }

    #[test]
    fn test_armed_rejection_is_synchronous() {
        let (link, session) = setup();
        link.armed.store(true, Ordering::SeqCst);
        let (updates, callback) = recorder();

        session.start(callback);

        assert_eq!(*updates.lock(), vec![(SessionResult::ArmedRejection, ProgressReport::empty())]);
        assert_eq!(session.state(), CalibrationState::Idle);
        assert!(link.commands.lock().is_empty());
    }

    #[test]
    fn test_busy_does_not_disturb_running_calibration() {
        let (link, session) = setup();
        let (first, first_cb) = recorder();
        let (second, second_cb) = recorder();

        session.start(first_cb);
        let attempt = session.current_attempt();
        session.start(second_cb);

        assert_eq!(*second.lock(), vec![(SessionResult::Busy, ProgressReport::empty())]);
        assert_eq!(session.current_attempt(), attempt);
        assert_eq!(link.commands.lock().len(), 1);

        link.emit("[cal] done");
        session.wait_for_callbacks();
        assert_eq!(*first.lock(), vec![(SessionResult::Success, ProgressReport::empty())]);
        assert_eq!(second.lock().len(), 1);
    }

    #[test]
    fn test_events_while_idle_are_dropped() {
        let (link, session) = setup();

        session.on_command_result(CommandResult::Timeout, 0.0);
        link.emit("[cal] done");
        session.on_diagnostic_line(&"[cal] failed: nope".into());
        session.wait_for_callbacks();

        assert_eq!(session.state(), CalibrationState::Idle);
        assert!(link.params.lock().is_empty());
        assert!(link.commands.lock().is_empty());
    }

    #[test]
    fn test_command_error_is_terminal() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.start(callback);
        link.ack(CommandResult::CommandDenied, 0.0);
        link.ack(CommandResult::Timeout, 0.0);
        link.emit("[cal] done");
        session.wait_for_callbacks();

        assert_eq!(*updates.lock(), vec![(SessionResult::CommandDenied, ProgressReport::empty())]);
        // Command errors do not touch parameters
        assert!(link.params.lock().is_empty());
    }

    #[test]
    fn test_in_progress_acks() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.start(callback);
        link.ack(CommandResult::InProgress, 0.3);
        link.ack(CommandResult::InProgress, 0.6);
        link.ack(CommandResult::Success, 1.0);
        link.emit("[cal] calibration done: rc");
        session.wait_for_callbacks();

        let progress: Vec<_> = updates.lock().iter().map(|(r, p)| (r.clone(), p.progress())).collect();
        assert_eq!(
            progress,
            vec![
                (SessionResult::Next, Some(0.3)),
                (SessionResult::Next, Some(0.6)),
                (SessionResult::Success, None),
            ]
        );
    }

    #[test]
    fn test_cancel() {
        let (link, session) = setup();
        let (updates, callback) = recorder();

        session.cancel();
        assert!(link.commands.lock().is_empty());

        session.start(callback);
        session.cancel();
        assert!(session.is_active());
        assert!(link.commands.lock()[1].is_calibration_cancel());

        link.emit("[cal] calibration cancelled");
        session.wait_for_callbacks();
        assert_eq!(*updates.lock(), vec![(SessionResult::Cancelled, ProgressReport::empty())]);
        assert_eq!(link.params.lock().len(), 1);
    }

    #[test]
    fn test_stale_ack_is_ignored() {
        let (link, session) = setup();
        let (first, first_cb) = recorder();
        let (second, second_cb) = recorder();

        session.start(first_cb);
        let stale = link.ack.lock().take();
        link.emit("[cal] done");

        session.start(second_cb);
        if let Some(mut stale) = stale {
            stale(CommandResult::Timeout, 0.0);
        }
        session.wait_for_callbacks();

        assert_eq!(first.lock().len(), 1);
        assert!(second.lock().is_empty());
        assert!(session.is_active());
    }

    #[test]
    fn test_callback_may_restart() {
        let link = Arc::new(RecordingLink::default());
        let session = Arc::new(CalibrationSession::new(link.clone()));
        let (inner_updates, inner_cb) = recorder();
        let inner_cb = Arc::new(Mutex::new(Some(inner_cb)));

        let weak = Arc::downgrade(&session);
        session.start(move |result, _| {
            if result.is_terminal() {
                if let (Some(session), Some(cb)) = (weak.upgrade(), inner_cb.lock().take()) {
                    session.start(cb);
                }
            }
        });
        link.emit("[cal] done");
        session.wait_for_callbacks();

        assert!(session.is_active());
        assert!(inner_updates.lock().is_empty());
        assert_eq!(link.commands.lock().len(), 2);
    }

    #[test]
    fn test_concurrent_streams_deliver_one_terminal() {
        let (link, session) = setup();
        let (updates, callback) = recorder();
        session.start(callback);

        std::thread::scope(|scope| {
            let lines = &link;
            scope.spawn(move || {
                for i in 0..100 {
                    lines.emit(&format!("[cal] progress {}", i));
                }
                lines.emit("[cal] done");
            });
            scope.spawn(|| {
                for _ in 0..100 {
                    session.on_command_result(CommandResult::InProgress, 0.5);
                }
                session.on_command_result(CommandResult::Timeout, 0.0);
            });
        });
        session.wait_for_callbacks();

        let updates = updates.lock();
        let terminals = updates.iter().filter(|(r, _)| r.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(updates.last().is_some_and(|(r, _)| r.is_terminal()));
        assert!(!session.is_active());
    }

    #[test]
    fn test_armed_check_with_mock_link() {
        let mut link = MockVehicleLink::new();
        link.expect_register_statustext_handler()
            .times(1)
            .returning(|_| HandlerId::new());
        link.expect_is_armed().times(1).return_const(true);
        link.expect_send_command().never();
        link.expect_param_changed().never();
        link.expect_unregister_statustext_handler()
            .times(1)
            .return_const(());

        let session = CalibrationSession::new(Arc::new(link));
        let (updates, callback) = recorder();
        session.start(callback);

        assert_eq!(updates.lock()[0].0, SessionResult::ArmedRejection);
    }

    #[test]
    fn test_custom_settings() {
        let link = Arc::new(RecordingLink::default());
        let settings = CalibrationSettings {
            marker: "[rc]".into(),
            param_changed: "RC_MAP_ROLL".into(),
            target_component: 42,
        };
        let session = CalibrationSession::with_settings(link.clone(), settings);
        let (updates, callback) = recorder();

        session.start(callback);
        link.emit("[cal] done");
        link.emit("[rc] done");
        session.wait_for_callbacks();

        assert_eq!(link.commands.lock()[0].target_component, 42);
        assert_eq!(updates.lock().len(), 1);
        assert_eq!(*link.params.lock(), vec!["RC_MAP_ROLL".to_string()]);
    }

    #[test]
    fn test_drop_unregisters_handler() {
        let link = Arc::new(RecordingLink::default());
        {
            let _session = CalibrationSession::new(link.clone());
            assert_eq!(link.handlers.lock().len(), 1);
        }
        assert!(link.handlers.lock().is_empty());
    }
}
