//! Job registry: the single writer of job lifecycle state.
//!
//! Every mutation runs under the registry-wide write lock, so transitions
//! on one job are totally ordered and a job record is never observed
//! together with a stale quota. Listings take the read side of the same
//! lock and therefore see a consistent snapshot.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use crate::error::CoreError;
use crate::job::{Job, JobFilter, JobPublic, JobState};
use crate::job_events::JobEvent;
use crate::quota::Quota;
use crate::store::{JobStore, UserStore};
use crate::types::{JobId, Timestamp, UserId};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Authority for job lifecycle transitions and per-user quota.
///
/// Created once at startup and shared as `Arc<JobRegistry>` between the
/// dispatch facade and the status poller.
pub struct JobRegistry {
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    lock: RwLock<()>,
    /// Jobs whose run command is being sent right now. Only touched while
    /// holding the write side of `lock`, or to release a claim.
    dispatching: Mutex<HashSet<JobId>>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    pub fn new(jobs: Arc<dyn JobStore>, users: Arc<dyn UserStore>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            jobs,
            users,
            lock: RwLock::new(()),
            dispatching: Mutex::new(HashSet::new()),
            event_tx,
        }
    }

    /// Subscribe to committed lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Queue a new job for `owner_id`, consuming one quota slot.
    pub async fn create(
        &self,
        owner_id: UserId,
        payload_ref: impl Into<String>,
    ) -> Result<Job, CoreError> {
        let payload_ref = payload_ref.into();
        validate_payload_ref(&payload_ref)?;

        let _guard = self.lock.write().await;

        let quota = self
            .users
            .quota(owner_id)
            .await?
            .ok_or_else(|| CoreError::user_not_found(owner_id))?;

        if !quota.has_capacity() {
            return Err(CoreError::QuotaExceeded {
                owner: owner_id,
                used: quota.used,
                total: quota.total,
            });
        }

        let job = Job::new(owner_id, payload_ref, Utc::now());
        self.jobs.put(&job).await?;

        if let Err(e) = self.users.set_quota_used(owner_id, quota.used + 1).await {
            // Keep the record and the quota in step.
            if let Err(rollback) = self.jobs.delete(job.job_id).await {
                tracing::error!(
                    job_id = %job.job_id,
                    error = %rollback,
                    "Failed to roll back job after quota update failure",
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            job_id = %job.job_id,
            owner_id,
            quota_used = quota.used + 1,
            quota_total = quota.total,
            "Job queued",
        );
        self.publish(JobEvent::Created {
            job_id: job.job_id,
            owner_id,
        });

        Ok(job)
    }

    /// Reserve the right to send the run command for `job_id`.
    ///
    /// Returns the job when it is queued, not yet dispatched and nobody
    /// else holds a claim on it; `None` otherwise. The claim ends with
    /// [`mark_dispatched`](Self::mark_dispatched),
    /// [`release_dispatch`](Self::release_dispatch) or deletion.
    pub async fn claim_dispatch(&self, job_id: JobId) -> Result<Option<Job>, CoreError> {
        let _guard = self.lock.write().await;

        let job = self.load(job_id).await?;
        if job.state != JobState::Queued || job.dispatched_at.is_some() {
            return Ok(None);
        }
        if !self.claims().insert(job_id) {
            return Ok(None);
        }
        Ok(Some(job))
    }

    /// Give up a dispatch claim after the run command could not be sent.
    pub fn release_dispatch(&self, job_id: JobId) {
        self.claims().remove(&job_id);
    }

    /// Record that the run command was delivered to the engine.
    ///
    /// Ends any dispatch claim on the job. Only meaningful while the job
    /// is queued; a job the engine already reported on is returned
    /// unchanged.
    pub async fn mark_dispatched(&self, job_id: JobId, at: Timestamp) -> Result<Job, CoreError> {
        let _guard = self.lock.write().await;
        self.claims().remove(&job_id);

        let mut job = self.load(job_id).await?;
        if job.state != JobState::Queued || job.dispatched_at.is_some() {
            return Ok(job);
        }

        job.dispatched_at = Some(at);
        self.jobs.put(&job).await?;
        self.publish(JobEvent::Dispatched { job_id, at });
        Ok(job)
    }

    /// Transition `Queued -> Running`, stamping `start_time`.
    ///
    /// Idempotent for a job that is already running.
    pub async fn mark_running(&self, job_id: JobId, at: Timestamp) -> Result<Job, CoreError> {
        let _guard = self.lock.write().await;

        let mut job = self.load(job_id).await?;
        if job.state == JobState::Running {
            return Ok(job);
        }
        Self::check_transition(&job, JobState::Running)?;

        job.state = JobState::Running;
        job.start_time = Some(at);
        self.jobs.put(&job).await?;

        tracing::info!(job_id = %job_id, start_time = %at, "Job running");
        self.publish(JobEvent::Started { job_id, at });
        Ok(job)
    }

    /// Transition `Running -> Completed` (or `Failed` when `success` is false).
    pub async fn mark_completed(
        &self,
        job_id: JobId,
        success: bool,
        at: Timestamp,
    ) -> Result<Job, CoreError> {
        let _guard = self.lock.write().await;

        let mut job = self.load(job_id).await?;
        let next = if success {
            JobState::Completed
        } else {
            JobState::Failed
        };
        Self::check_transition(&job, next)?;

        job.state = next;
        job.finished_at = Some(at);
        self.jobs.put(&job).await?;

        tracing::info!(job_id = %job_id, state = %next, "Job finished");
        self.publish(JobEvent::Finished {
            job_id,
            state: next,
            at,
        });
        Ok(job)
    }

    /// Delete a job on behalf of its owner and free its quota slot.
    ///
    /// Returns the removed record with its state set to `Deleted`.
    /// Unknown (or already deleted) jobs yield `NotFound`; another user's
    /// job yields `Forbidden`. Neither touches stored state.
    pub async fn delete(&self, job_id: JobId, owner_id: UserId) -> Result<Job, CoreError> {
        let _guard = self.lock.write().await;

        let mut job = self.load(job_id).await?;
        if job.owner_id != owner_id {
            return Err(CoreError::Forbidden(format!(
                "job {job_id} does not belong to user {owner_id}"
            )));
        }

        if !self.jobs.delete(job_id).await? {
            return Err(CoreError::job_not_found(job_id));
        }
        self.claims().remove(&job_id);
        self.release_quota(owner_id, 1).await?;

        tracing::info!(job_id = %job_id, owner_id, from = %job.state, "Job deleted");
        job.state = JobState::Deleted;
        self.publish(JobEvent::Deleted { job_id, owner_id });
        Ok(job)
    }

    /// Remove every job of `owner_id` and reset their quota usage.
    ///
    /// Operator maintenance; returns the number of removed records.
    pub async fn purge_owner(&self, owner_id: UserId) -> Result<usize, CoreError> {
        let _guard = self.lock.write().await;

        let jobs = self
            .jobs
            .query_by_owner_and_state(owner_id, &JobState::LIVE)
            .await?;

        let mut removed = 0;
        for job in &jobs {
            if self.jobs.delete(job.job_id).await? {
                self.claims().remove(&job.job_id);
                removed += 1;
                self.publish(JobEvent::Deleted {
                    job_id: job.job_id,
                    owner_id,
                });
            }
        }

        if self.users.quota(owner_id).await?.is_some() {
            self.users.set_quota_used(owner_id, 0).await?;
        }

        tracing::warn!(owner_id, removed, "Purged all jobs of user");
        Ok(removed)
    }

    /// Jobs of `owner_id` matching `filter`, ordered by `start_time` then
    /// `job_id`.
    pub async fn query(&self, filter: &JobFilter, owner_id: UserId) -> Result<JobListing, CoreError> {
        let _guard = self.lock.read().await;

        let jobs = self
            .jobs
            .query_by_owner_and_state(owner_id, &filter.resolved())
            .await?;
        Ok(JobListing::from_unsorted(
            jobs.into_iter().filter(|j| filter.matches(j.state)).collect(),
        ))
    }

    /// All queued and running jobs across owners, for the status poller.
    pub async fn active_jobs(&self) -> Result<JobListing, CoreError> {
        let _guard = self.lock.read().await;

        let jobs = self.jobs.query_by_state(&JobState::ACTIVE).await?;
        Ok(JobListing::from_unsorted(jobs))
    }

    /// A single job, visible only to its owner.
    pub async fn get(&self, job_id: JobId, owner_id: UserId) -> Result<Job, CoreError> {
        let _guard = self.lock.read().await;

        let job = self.load(job_id).await?;
        if job.owner_id != owner_id {
            return Err(CoreError::Forbidden(format!(
                "job {job_id} does not belong to user {owner_id}"
            )));
        }
        Ok(job)
    }

    pub async fn quota(&self, owner_id: UserId) -> Result<Quota, CoreError> {
        let _guard = self.lock.read().await;

        self.users
            .quota(owner_id)
            .await?
            .ok_or_else(|| CoreError::user_not_found(owner_id))
    }

    // ---- private helpers ----

    fn claims(&self) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
        self.dispatching
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn load(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))
    }

    async fn release_quota(&self, owner_id: UserId, count: i32) -> Result<(), CoreError> {
        match self.users.quota(owner_id).await? {
            Some(quota) => {
                let used = (quota.used - count).max(0);
                self.users.set_quota_used(owner_id, used).await?;
            }
            None => {
                tracing::warn!(owner_id, "Owner of deleted job has no quota record");
            }
        }
        Ok(())
    }

    fn check_transition(job: &Job, next: JobState) -> Result<(), CoreError> {
        if job.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                job_id: job.job_id,
                from: job.state,
                to: next,
            })
        }
    }

    fn publish(&self, event: JobEvent) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }
}

/// The run command carries `payload_ref` as one whitespace-free token.
fn validate_payload_ref(payload_ref: &str) -> Result<(), CoreError> {
    if payload_ref.is_empty() {
        return Err(CoreError::Validation("payload_ref must not be empty".into()));
    }
    if payload_ref.chars().any(char::is_whitespace) {
        return Err(CoreError::Validation(format!(
            "payload_ref {payload_ref:?} must not contain whitespace"
        )));
    }
    Ok(())
}

/// Ordered snapshot of jobs taken at query time.
///
/// Finite and restartable: iterate it as many times as needed, each pass
/// yields the same jobs in the same order.
#[derive(Debug, Clone)]
pub struct JobListing {
    jobs: Arc<[Job]>,
}

impl JobListing {
    fn from_unsorted(mut jobs: Vec<Job>) -> Self {
        jobs.sort_by(Job::listing_order);
        Self { jobs: jobs.into() }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Public projections, in listing order.
    pub fn public(&self) -> impl Iterator<Item = JobPublic> + '_ {
        self.jobs.iter().map(Job::public)
    }
}

impl<'a> IntoIterator for &'a JobListing {
    type Item = &'a Job;
    type IntoIter = std::slice::Iter<'a, Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}
