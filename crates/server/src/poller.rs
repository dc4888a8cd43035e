//! Background status poller.
//!
//! Every `poll_interval` the poller walks the registry's active jobs, asks
//! the engine for each job's progress and applies the resulting lifecycle
//! transitions. Queued jobs whose run command never reached the engine are
//! re-sent first. Nothing inside a tick escapes the loop; an unreachable
//! engine just ends the current tick early.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spinw_core::error::CoreError;
use spinw_core::job::{Job, JobState};
use spinw_core::registry::JobRegistry;
use spinw_core::types::{JobId, Timestamp};
use spinw_engine::{EngineConnection, EngineError, EngineReport, StatusSource};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_STALE_AFTER};
use crate::dispatch::{send_run, Dispatch};

/// Lower bound applied to the poll period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Active jobs looked at.
    pub checked: usize,
    /// Queued jobs whose run command was delivered this tick.
    pub redispatched: usize,
    pub started: usize,
    pub finished: usize,
    /// The engine was unreachable and the rest of the tick was skipped.
    pub aborted: bool,
}

/// Single long-lived task reconciling registry state with engine reports.
pub struct StatusPoller {
    registry: Arc<JobRegistry>,
    engine: Arc<EngineConnection>,
    status: Arc<dyn StatusSource>,
    poll_interval: Duration,
    stale_after: Duration,
    warned_stale: HashSet<JobId>,
}

impl StatusPoller {
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<EngineConnection>,
        status: Arc<dyn StatusSource>,
    ) -> Self {
        Self {
            registry,
            engine,
            status,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            warned_stale: HashSet::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run the poll loop until the cancellation token is triggered.
    pub async fn run(mut self, cancel: CancellationToken) {
        // `interval` panics on a zero period.
        let period = self.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = period.as_millis() as u64,
            "Status poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Status poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.tick(Utc::now()).await;
                    if summary.started + summary.finished + summary.redispatched > 0 {
                        tracing::debug!(?summary, "Poll cycle applied changes");
                    }
                }
            }
        }
    }

    /// One poll cycle at time `now`.
    pub async fn tick(&mut self, now: Timestamp) -> TickSummary {
        let mut summary = TickSummary::default();

        let jobs = match self.registry.active_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list active jobs");
                return summary;
            }
        };
        self.warned_stale
            .retain(|id| jobs.iter().any(|job| job.job_id == *id));

        for job in &jobs {
            summary.checked += 1;

            if job.state == JobState::Queued && job.dispatched_at.is_none() {
                match send_run(&self.registry, &self.engine, job).await {
                    Ok(Dispatch::Sent(_)) => {
                        tracing::info!(job_id = %job.job_id, "Re-sent queued job to engine");
                        summary.redispatched += 1;
                    }
                    Ok(Dispatch::Skipped) => {}
                    Err(e) => {
                        self.skip_rest(&e, job, &mut summary);
                        if summary.aborted {
                            break;
                        }
                    }
                }
                continue;
            }

            let report = match self.status.report(job.job_id).await {
                Ok(report) => report,
                Err(e) => {
                    self.skip_rest(&e, job, &mut summary);
                    if summary.aborted {
                        break;
                    }
                    continue;
                }
            };

            match report {
                None => self.check_stale(job, now),
                Some(EngineReport::Running { started_at }) => {
                    if job.state == JobState::Queued
                        && self.apply_running(job.job_id, started_at.unwrap_or(now)).await
                    {
                        summary.started += 1;
                    }
                }
                Some(EngineReport::Completed) => {
                    if self.apply_finished(job, true, now, &mut summary).await {
                        summary.finished += 1;
                    }
                }
                Some(EngineReport::Failed) => {
                    if self.apply_finished(job, false, now, &mut summary).await {
                        summary.finished += 1;
                    }
                }
            }
        }

        summary
    }

    // ---- private helpers ----

    /// Log an engine error for `job`; mark the tick aborted when the engine
    /// itself is down.
    fn skip_rest(&self, error: &EngineError, job: &Job, summary: &mut TickSummary) {
        if error.is_unavailable() {
            tracing::warn!(
                job_id = %job.job_id,
                error = %error,
                "Engine unreachable, skipping rest of poll cycle",
            );
            summary.aborted = true;
        } else {
            tracing::warn!(job_id = %job.job_id, error = %error, "Failed to poll job status");
        }
    }

    /// A finished report always goes through `Running` first.
    async fn apply_finished(
        &self,
        job: &Job,
        success: bool,
        now: Timestamp,
        summary: &mut TickSummary,
    ) -> bool {
        if job.state == JobState::Queued {
            if !self.apply_running(job.job_id, now).await {
                return false;
            }
            summary.started += 1;
        }

        match self.registry.mark_completed(job.job_id, success, now).await {
            Ok(_) => true,
            Err(e) => {
                log_transition_error(job.job_id, &e);
                false
            }
        }
    }

    async fn apply_running(&self, job_id: JobId, at: Timestamp) -> bool {
        match self.registry.mark_running(job_id, at).await {
            Ok(_) => true,
            Err(e) => {
                log_transition_error(job_id, &e);
                false
            }
        }
    }

    fn check_stale(&mut self, job: &Job, now: Timestamp) {
        let Some(dispatched_at) = job.dispatched_at else {
            return;
        };
        if job.state != JobState::Queued {
            return;
        }
        let waited = (now - dispatched_at).to_std().unwrap_or_default();
        if waited >= self.stale_after && self.warned_stale.insert(job.job_id) {
            tracing::warn!(
                job_id = %job.job_id,
                waited_secs = waited.as_secs(),
                "Engine has not picked up dispatched job",
            );
        }
    }
}

fn log_transition_error(job_id: JobId, error: &CoreError) {
    match error {
        CoreError::InvalidTransition { .. } => {
            tracing::error!(job_id = %job_id, error = %error, "Engine report contradicts job state");
        }
        // Deleted while the report was in flight.
        CoreError::NotFound { .. } => {
            tracing::debug!(job_id = %job_id, "Job gone before report was applied");
        }
        _ => {
            tracing::error!(job_id = %job_id, error = %error, "Failed to apply engine report");
        }
    }
}
