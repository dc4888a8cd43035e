//! Lifecycle events published by the job registry after each committed
//! transition.

use serde::Serialize;

use crate::job::JobState;
use crate::types::{JobId, Timestamp, UserId};

/// A committed change to a job record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was queued for an owner.
    Created { job_id: JobId, owner_id: UserId },

    /// The run command reached the engine.
    Dispatched { job_id: JobId, at: Timestamp },

    /// The engine confirmed the job started.
    Started { job_id: JobId, at: Timestamp },

    /// The job reached `Completed` or `Failed`.
    Finished {
        job_id: JobId,
        state: JobState,
        at: Timestamp,
    },

    /// The owner deleted the job; its quota slot is free again.
    Deleted { job_id: JobId, owner_id: UserId },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Created { job_id, .. }
            | Self::Dispatched { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Finished { job_id, .. }
            | Self::Deleted { job_id, .. } => *job_id,
        }
    }
}
