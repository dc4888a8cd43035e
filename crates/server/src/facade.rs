//! Entry points for the outer request layer.
//!
//! [`DispatchFacade`] is the only surface callers use: it validates quota
//! through the registry, hands work to the engine and exposes per-owner
//! views. Engine trouble never fails a request that the registry accepted;
//! the status poller retries undelivered jobs.

use std::sync::Arc;

use spinw_core::error::CoreError;
use spinw_core::job::{JobFilter, JobPublic};
use spinw_core::quota::Quota;
use spinw_core::registry::JobRegistry;
use spinw_core::types::{JobId, UserId};
use spinw_engine::{EngineCommand, EngineConnection};

use crate::dispatch::{send_run, Dispatch};

#[derive(Clone)]
pub struct DispatchFacade {
    registry: Arc<JobRegistry>,
    engine: Arc<EngineConnection>,
}

impl DispatchFacade {
    pub fn new(registry: Arc<JobRegistry>, engine: Arc<EngineConnection>) -> Self {
        Self { registry, engine }
    }

    /// Queue a job and try to start it on the engine right away.
    ///
    /// Quota and unknown-owner errors come back as-is. If the engine cannot
    /// be reached the job is still created and stays queued.
    pub async fn submit(
        &self,
        owner_id: UserId,
        payload_ref: impl Into<String>,
    ) -> Result<JobId, CoreError> {
        let job = self.registry.create(owner_id, payload_ref).await?;

        match send_run(&self.registry, &self.engine, &job).await {
            Ok(Dispatch::Sent(delivery)) => {
                tracing::info!(job_id = %job.job_id, ?delivery, "Job sent to engine");
            }
            Ok(Dispatch::Skipped) => {
                tracing::debug!(job_id = %job.job_id, "Job already dispatched by the poller");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    error = %e,
                    "Engine did not accept job, leaving it queued",
                );
            }
        }
        Ok(job.job_id)
    }

    /// Delete a job on behalf of its owner.
    ///
    /// A job the engine may still be working on also gets an advisory
    /// `cancel` command; failing to deliver it is only logged.
    pub async fn cancel(&self, job_id: JobId, owner_id: UserId) -> Result<JobPublic, CoreError> {
        let job = self.registry.delete(job_id, owner_id).await?;

        if job.dispatched_at.is_some() && job.finished_at.is_none() {
            if let Err(e) = self.engine.send(&EngineCommand::Cancel { job_id }).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to send cancel to engine");
            }
        }
        Ok(job.public())
    }

    /// The owner's jobs matching `filter`, in listing order.
    pub async fn query(
        &self,
        owner_id: UserId,
        filter: &JobFilter,
    ) -> Result<Vec<JobPublic>, CoreError> {
        let listing = self.registry.query(filter, owner_id).await?;
        Ok(listing.public().collect())
    }

    pub async fn status(&self, job_id: JobId, owner_id: UserId) -> Result<JobPublic, CoreError> {
        Ok(self.registry.get(job_id, owner_id).await?.public())
    }

    pub async fn quota(&self, owner_id: UserId) -> Result<Quota, CoreError> {
        self.registry.quota(owner_id).await
    }
}
