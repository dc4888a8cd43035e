//! Text commands understood by the engine.
//!
//! Each command is a single UTF-8 line. The connection manager appends
//! the terminating newline when writing.

use std::fmt;

use spinw_core::types::JobId;

/// A command for the engine's command socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Start computing a job from its submitted payload.
    Run { job_id: JobId, payload_ref: String },
    /// Ask the engine to refresh the status report of a job.
    Status { job_id: JobId },
    /// Advisory request to stop working on a job.
    Cancel { job_id: JobId },
}

impl EngineCommand {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Run { job_id, .. } | Self::Status { job_id } | Self::Cancel { job_id } => *job_id,
        }
    }

    /// Short verb used in logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Status { .. } => "status",
            Self::Cancel { .. } => "cancel",
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run {
                job_id,
                payload_ref,
            } => write!(f, "run {job_id} {payload_ref}"),
            Self::Status { job_id } => write!(f, "status {job_id}"),
            Self::Cancel { job_id } => write!(f, "cancel {job_id}"),
        }
    }
}
