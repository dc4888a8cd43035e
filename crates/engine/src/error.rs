use spinw_core::types::JobId;

/// Errors raised while talking to the compute engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine process could not be started.
    #[error("Failed to launch engine {executable}: {source}")]
    Launch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    /// The command socket could not be opened.
    #[error("Failed to connect to engine at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// A command could not be delivered even after the one-shot recovery.
    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    /// The connection manager has been shut down.
    #[error("Engine connection is closed")]
    Closed,

    /// The engine wrote a status report that could not be understood.
    #[error("Invalid engine report for job {job_id}: {reason}")]
    Report { job_id: JobId, reason: String },

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the engine itself could not be reached, as opposed to a
    /// problem with a single command or report.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. } | Self::Connect { .. } | Self::Unreachable(_) | Self::Closed
        )
    }
}
