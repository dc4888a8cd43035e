/// User accounts live in PostgreSQL BIGSERIAL rows owned by the auth layer.
pub type DbId = i64;

/// Owner of a job. Referenced, never owned, by this service.
pub type UserId = DbId;

/// Jobs are identified by time-ordered UUIDs (v7) allocated by the registry.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Allocate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
