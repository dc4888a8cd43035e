//! PostgreSQL storage backend.
//!
//! Job lifecycle states are stored as SMALLINT `status_id` values matching
//! [`JobState::id`]. Ordering for listings is done in SQL with
//! `started_at ASC NULLS LAST, id ASC`, the same order the registry uses.

use async_trait::async_trait;
use spinw_core::job::{Job, JobState, StatusId};
use spinw_core::quota::Quota;
use spinw_core::store::{JobStore, StoreError, UserStore};
use spinw_core::types::{JobId, Timestamp, UserId};
use sqlx::{FromRow, PgPool};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, status_id, payload_ref, \
    submitted_at, started_at, finished_at, dispatched_at";

/// Listing order shared by every multi-row query.
const ORDER_BY: &str = "ORDER BY started_at ASC NULLS LAST, id ASC";

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: JobId,
    owner_id: UserId,
    status_id: StatusId,
    payload_ref: String,
    submitted_at: Timestamp,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
    dispatched_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = JobState::from_id(row.status_id).ok_or_else(|| {
            StoreError::Corrupt(format!("job {} has unknown status_id {}", row.id, row.status_id))
        })?;
        Ok(Job {
            job_id: row.id,
            owner_id: row.owner_id,
            state,
            payload_ref: row.payload_ref,
            submitted_at: row.submitted_at,
            start_time: row.started_at,
            finished_at: row.finished_at,
            dispatched_at: row.dispatched_at,
        })
    }
}

/// A row from the `users` table, quota columns only.
#[derive(Debug, Clone, Copy, FromRow)]
struct QuotaRow {
    quota_used: i32,
    quota_total: i32,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn status_ids(states: &[JobState]) -> Vec<StatusId> {
    states.iter().map(|s| s.id()).collect()
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Job and quota storage backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        if job.state == JobState::Deleted {
            return Err(StoreError::Backend(format!(
                "refusing to store deleted job {}",
                job.job_id
            )));
        }

        // Only mutable columns are touched on conflict; owner and payload
        // are fixed at creation.
        sqlx::query(
            "INSERT INTO jobs \
                 (id, owner_id, status_id, payload_ref, submitted_at, started_at, finished_at, dispatched_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 status_id = EXCLUDED.status_id, \
                 started_at = EXCLUDED.started_at, \
                 finished_at = EXCLUDED.finished_at, \
                 dispatched_at = EXCLUDED.dispatched_at",
        )
        .bind(job.job_id)
        .bind(job.owner_id)
        .bind(job.state.id())
        .bind(&job.payload_ref)
        .bind(job.submitted_at)
        .bind(job.start_time)
        .bind(job.finished_at)
        .bind(job.dispatched_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Job::try_from)
            .transpose()
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_by_owner_and_state(
        &self,
        owner_id: UserId,
        states: &[JobState],
    ) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE owner_id = $1 AND status_id = ANY($2) \
             {ORDER_BY}"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(owner_id)
            .bind(status_ids(states))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        into_jobs(rows)
    }

    async fn query_by_state(&self, states: &[JobState]) -> Result<Vec<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE status_id = ANY($1) {ORDER_BY}");
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(status_ids(states))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        into_jobs(rows)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn quota(&self, user_id: UserId) -> Result<Option<Quota>, StoreError> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "SELECT quota_used, quota_total FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|r| Quota::new(r.quota_used, r.quota_total)))
    }

    async fn set_quota_used(&self, user_id: UserId, used: i32) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET quota_used = $2 WHERE id = $1")
            .bind(user_id)
            .bind(used)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("unknown user {user_id}")));
        }
        Ok(())
    }
}
