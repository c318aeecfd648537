//! Boundary to the vehicle connection
//!
//! A calibration session only needs four things from the connection: the
//! arming state, a way to send commands, the stream of status lines and a
//! way to tell the parameter cache that a value may have changed.

use super::command::{CommandLong, CommandResult};
use super::statustext::RawDiagnosticLine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Receives command results; called once per ack, possibly several times
/// for `InProgress` acks, or never if the link goes away
pub type CommandResultCallback = Box<dyn FnMut(CommandResult, f32) + Send + 'static>;

/// Receives every status line the device emits, in emission order
pub type StatustextHandler = Arc<dyn Fn(&RawDiagnosticLine) + Send + Sync + 'static>;

/// Registration token for a statustext handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vehicle connection as seen by a calibration session
///
/// Implementations must not invoke callbacks or handlers synchronously from
/// within the calling method while holding their own locks.
#[cfg_attr(test, mockall::automock)]
pub trait VehicleLink: Send + Sync {
    /// Current arming state
    fn is_armed(&self) -> bool;

    /// Send a command; `on_result` receives the engine's verdict
    fn send_command(&self, command: CommandLong, on_result: Option<CommandResultCallback>);

    /// Register a handler for status lines
    fn register_statustext_handler(&self, handler: StatustextHandler) -> HandlerId;

    /// Remove a handler registered earlier
    fn unregister_statustext_handler(&self, id: HandlerId);

    /// Notify the parameter cache that `name` may have changed
    fn param_changed(&self, name: &str);
}
