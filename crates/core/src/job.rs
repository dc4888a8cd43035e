//! Job records, lifecycle states and the public listing projection.
//!
//! A job moves strictly forward:
//!
//! ```text
//! Queued -> Running -> Completed
//!                   \-> Failed
//! (any) -> Deleted
//! ```
//!
//! `Deleted` is terminal and never stored; deleting a job removes its
//! record from the registry.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{new_job_id, JobId, Timestamp, UserId};

/// Status ID type matching the SMALLINT `status_id` column.
pub type StatusId = i16;

/// Lifecycle state of a job. Discriminants match the `status_id` column.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Deleted = 5,
}

impl JobState {
    /// Every state a stored job can be in.
    pub const LIVE: [JobState; 4] = [
        JobState::Queued,
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
    ];

    /// States the status poller reconciles.
    pub const ACTIVE: [JobState; 2] = [JobState::Queued, JobState::Running];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to a state.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Queued),
            2 => Some(Self::Running),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            5 => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the job has finished executing (successfully or not).
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Deleted)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// Staying in the same state is not a transition and returns `false`;
    /// callers that want idempotence check for equality first.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (Self::Deleted, _) => false,
            (_, Self::Deleted) => true,
            (Self::Queued, Self::Running) => true,
            (Self::Running, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobState> for StatusId {
    fn from(value: JobState) -> Self {
        value as StatusId
    }
}

/// A job record as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub owner_id: UserId,
    pub state: JobState,
    /// Opaque reference to the submitted work (e.g. an input file name in
    /// the engine work folder). Never mutated after creation.
    pub payload_ref: String,
    pub submitted_at: Timestamp,
    /// Set when the engine confirms the job started.
    pub start_time: Option<Timestamp>,
    /// Set when the engine reports completion or failure.
    pub finished_at: Option<Timestamp>,
    /// Set once the run command reached the engine socket.
    pub dispatched_at: Option<Timestamp>,
}

impl Job {
    /// Build a new queued job with a freshly allocated id.
    pub fn new(owner_id: UserId, payload_ref: impl Into<String>, submitted_at: Timestamp) -> Self {
        Self {
            job_id: new_job_id(),
            owner_id,
            state: JobState::Queued,
            payload_ref: payload_ref.into(),
            submitted_at,
            start_time: None,
            finished_at: None,
            dispatched_at: None,
        }
    }

    /// Projection exposed to job owners.
    pub fn public(&self) -> JobPublic {
        JobPublic {
            job_id: self.job_id,
            state: self.state,
            start_time: self.start_time,
        }
    }

    /// Canonical listing order: ascending `start_time`, jobs that have not
    /// started yet last, ties broken by `job_id`.
    pub fn listing_order(&self, other: &Job) -> Ordering {
        match (self.start_time, other.start_time) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

/// Public view of a job: `{job_id, state, start_time}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPublic {
    pub job_id: JobId,
    pub state: JobState,
    pub start_time: Option<Timestamp>,
}

/// State subset used to filter listings. An empty filter matches every
/// stored state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    states: Vec<JobState>,
}

impl JobFilter {
    /// Match every stored job.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match only the given states.
    pub fn states(states: impl IntoIterator<Item = JobState>) -> Self {
        let mut states: Vec<JobState> = states.into_iter().collect();
        states.sort_by_key(|s| s.id());
        states.dedup();
        Self { states }
    }

    /// The concrete states to ask storage for.
    pub fn resolved(&self) -> Vec<JobState> {
        if self.states.is_empty() {
            JobState::LIVE.to_vec()
        } else {
            self.states.clone()
        }
    }

    pub fn matches(&self, state: JobState) -> bool {
        if self.states.is_empty() {
            state != JobState::Deleted
        } else {
            self.states.contains(&state)
        }
    }
}
