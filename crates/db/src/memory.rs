//! In-process storage backend.
//!
//! Used when no `DATABASE_URL` is configured and by the test suites.
//! Users are either registered explicitly with [`MemoryStore::with_user`]
//! or provisioned on first sight with the default quota.

use std::collections::HashMap;

use async_trait::async_trait;
use spinw_core::job::{Job, JobState};
use spinw_core::quota::Quota;
use spinw_core::store::{JobStore, StoreError, UserStore};
use spinw_core::types::{JobId, UserId};
use tokio::sync::RwLock;

/// Job and quota tables held in memory.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    users: RwLock<HashMap<UserId, Quota>>,
    /// Quota granted to users seen for the first time. `None` means
    /// unknown users are rejected.
    default_quota_total: Option<i32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision unknown users on demand with `total` job slots.
    pub fn with_default_quota(mut self, total: i32) -> Self {
        self.default_quota_total = Some(total);
        self
    }

    /// Register a user with an explicit quota cap.
    pub fn with_user(mut self, user_id: UserId, quota_total: i32) -> Self {
        self.users
            .get_mut()
            .insert(user_id, Quota::new(0, quota_total));
        self
    }

    /// Register (or replace) a user's quota cap, keeping their usage.
    pub async fn set_quota_total(&self, user_id: UserId, quota_total: i32) {
        let mut users = self.users.write().await;
        let used = users.get(&user_id).map(|q| q.used).unwrap_or(0);
        users.insert(user_id, Quota::new(used, quota_total));
    }

    /// Number of stored job records.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by(Job::listing_order);
    jobs
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        if job.state == JobState::Deleted {
            return Err(StoreError::Backend(format!(
                "refusing to store deleted job {}",
                job.job_id
            )));
        }
        self.jobs.write().await.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self.jobs.write().await.remove(&job_id).is_some())
    }

    async fn query_by_owner_and_state(
        &self,
        owner_id: UserId,
        states: &[JobState],
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(sorted(
            jobs.values()
                .filter(|j| j.owner_id == owner_id && states.contains(&j.state))
                .cloned()
                .collect(),
        ))
    }

    async fn query_by_state(&self, states: &[JobState]) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(sorted(
            jobs.values()
                .filter(|j| states.contains(&j.state))
                .cloned()
                .collect(),
        ))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn quota(&self, user_id: UserId) -> Result<Option<Quota>, StoreError> {
        if let Some(quota) = self.users.read().await.get(&user_id) {
            return Ok(Some(*quota));
        }

        let Some(total) = self.default_quota_total else {
            return Ok(None);
        };

        let mut users = self.users.write().await;
        let quota = *users.entry(user_id).or_insert_with(|| {
            tracing::debug!(user_id, quota_total = total, "Provisioned quota for new user");
            Quota::new(0, total)
        });
        Ok(Some(quota))
    }

    async fn set_quota_used(&self, user_id: UserId, used: i32) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let quota = users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown user {user_id}")))?;

        if used < 0 || used > quota.total {
            return Err(StoreError::Backend(format!(
                "quota_used {used} out of range for user {user_id} (total {})",
                quota.total
            )));
        }
        quota.used = used;
        Ok(())
    }
}
