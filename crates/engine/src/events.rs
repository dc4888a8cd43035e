//! Connection-level events emitted by the engine connection manager.
//!
//! These let the rest of the service observe engine restarts and socket
//! drops without reaching into the manager's internals.

use serde::Serialize;

/// A state change of the engine process or its command socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new engine process was started.
    ProcessLaunched { pid: Option<u32> },

    /// The engine process was terminated by the manager.
    ProcessTerminated,

    /// The command socket is open.
    Connected { endpoint: String },

    /// The command socket was dropped after a failure or at shutdown.
    Disconnected { reason: String },

    /// A failed write triggered the one-shot recovery.
    RetryScheduled { cooldown_ms: u64 },
}
