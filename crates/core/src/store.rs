//! Storage seams for the job registry.
//!
//! Backends are pure data access: they persist what the registry hands
//! them and never validate transitions themselves. Implementations live
//! in `spinw-db`.

use async_trait::async_trait;

use crate::job::{Job, JobState};
use crate::quota::Quota;
use crate::types::{JobId, UserId};

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("Storage error: {0}")]
    Backend(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Durable mapping from job id to job record.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job record.
    async fn put(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Remove a job record. Returns `false` if nothing was stored.
    async fn delete(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Jobs of one owner in the given states, ordered by `start_time`
    /// (unstarted last), then `job_id`.
    async fn query_by_owner_and_state(
        &self,
        owner_id: UserId,
        states: &[JobState],
    ) -> Result<Vec<Job>, StoreError>;

    /// Jobs of every owner in the given states, same ordering.
    async fn query_by_state(&self, states: &[JobState]) -> Result<Vec<Job>, StoreError>;
}

/// Quota columns of the externally managed user table.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Current quota of a user, or `None` for an unknown user.
    async fn quota(&self, user_id: UserId) -> Result<Option<Quota>, StoreError>;

    async fn set_quota_used(&self, user_id: UserId, used: i32) -> Result<(), StoreError>;
}
