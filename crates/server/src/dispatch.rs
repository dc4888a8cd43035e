//! Delivering `run` commands and recording the delivery.

use chrono::Utc;
use spinw_core::error::CoreError;
use spinw_core::job::Job;
use spinw_core::registry::JobRegistry;
use spinw_engine::{Delivery, EngineCommand, EngineConnection, EngineError};

/// Result of a dispatch attempt that did not fail on the engine side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Sent(Delivery),
    /// Already dispatched, no longer queued, or being sent by another task.
    Skipped,
}

/// Send the run command for `job` and stamp `dispatched_at` on delivery.
///
/// The registry claim makes sure at most one task sends `run` for a job.
/// Engine failures release the claim and are returned to the caller; the
/// job stays queued. A failure to record the delivery is only logged since
/// the command already reached the engine.
pub(crate) async fn send_run(
    registry: &JobRegistry,
    engine: &EngineConnection,
    job: &Job,
) -> Result<Dispatch, EngineError> {
    let job = match registry.claim_dispatch(job.job_id).await {
        Ok(Some(job)) => job,
        Ok(None) | Err(CoreError::NotFound { .. }) => return Ok(Dispatch::Skipped),
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to claim job for dispatch");
            return Ok(Dispatch::Skipped);
        }
    };

    let sent = engine
        .send(&EngineCommand::Run {
            job_id: job.job_id,
            payload_ref: job.payload_ref.clone(),
        })
        .await;
    let delivery = match sent {
        Ok(delivery) => delivery,
        Err(e) => {
            registry.release_dispatch(job.job_id);
            return Err(e);
        }
    };

    match registry.mark_dispatched(job.job_id, Utc::now()).await {
        Ok(_) => {}
        // Deleted between delivery and bookkeeping.
        Err(CoreError::NotFound { .. }) => {
            tracing::debug!(job_id = %job.job_id, "Job gone before dispatch was recorded");
        }
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to record job dispatch");
        }
    }
    Ok(Dispatch::Sent(delivery))
}
