use crate::job::JobState;
use crate::store::StoreError;
use crate::types::{JobId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Quota exceeded for user {owner}: {used} of {total} jobs in use")]
    QuotaExceeded { owner: UserId, used: i32, total: i32 },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl CoreError {
    pub fn job_not_found(job_id: JobId) -> Self {
        Self::NotFound {
            entity: "job",
            id: job_id.to_string(),
        }
    }

    pub fn user_not_found(user_id: UserId) -> Self {
        Self::NotFound {
            entity: "user",
            id: user_id.to_string(),
        }
    }
}
