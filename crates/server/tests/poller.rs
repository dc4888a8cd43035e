//! Integration tests for the status poller.
//!
//! Ticks are driven by hand with explicit timestamps; only the run-loop
//! tests use the real interval (with paused time).

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use spinw_core::job::JobState;
use spinw_core::job_events::JobEvent;
use spinw_engine::{EngineReport, StatusSource};
use spinw_server::poller::{StatusPoller, TickSummary};
use tokio_util::sync::CancellationToken;

use common::{cold_fixture, fixture, Fixture, ALICE};

fn poller(fx: &Fixture) -> StatusPoller {
    let status: Arc<dyn StatusSource> = fx.status.clone();
    StatusPoller::new(Arc::clone(&fx.registry), Arc::clone(&fx.connection), status)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_then_completed_reports_drive_lifecycle() {
    let fx = fixture(1, true);
    let mut poller = poller(&fx);
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();

    // No report yet: nothing changes.
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.checked, 1);
    assert_eq!(fx.facade.status(job_id, ALICE).await.unwrap().state, JobState::Queued);

    let started_at = Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap();
    fx.status.set(
        job_id,
        EngineReport::Running {
            started_at: Some(started_at),
        },
    );
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.started, 1);

    let public = fx.facade.status(job_id, ALICE).await.unwrap();
    assert_eq!(public.state, JobState::Running);
    assert_eq!(public.start_time, Some(started_at));

    // Repeated running reports are harmless.
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.started, 0);

    fx.status.set(job_id, EngineReport::Completed);
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.finished, 1);

    let public = fx.facade.status(job_id, ALICE).await.unwrap();
    assert_eq!(public.state, JobState::Completed);
    assert_eq!(public.start_time, Some(started_at));
    assert!(fx.registry.active_jobs().await.unwrap().is_empty());

    // Finished jobs keep their slot until deleted.
    assert_eq!(fx.facade.quota(ALICE).await.unwrap().used, 1);
}

#[tokio::test]
async fn running_report_without_time_uses_tick_time() {
    let fx = fixture(1, true);
    let mut poller = poller(&fx);
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();

    fx.status.set(job_id, EngineReport::Running { started_at: None });
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
    poller.tick(now).await;

    let public = fx.facade.status(job_id, ALICE).await.unwrap();
    assert_eq!(public.start_time, Some(now));
}

#[tokio::test]
async fn terminal_report_on_queued_job_passes_through_running() {
    let fx = fixture(1, true);
    let mut poller = poller(&fx);
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();
    let mut events = fx.registry.subscribe();

    fx.status.set(job_id, EngineReport::Failed);
    let now = Utc::now();
    let summary = poller.tick(now).await;
    assert_eq!(
        summary,
        TickSummary {
            checked: 1,
            started: 1,
            finished: 1,
            ..TickSummary::default()
        }
    );

    assert_eq!(events.try_recv().unwrap(), JobEvent::Started { job_id, at: now });
    assert_eq!(
        events.try_recv().unwrap(),
        JobEvent::Finished {
            job_id,
            state: JobState::Failed,
            at: now,
        }
    );

    let public = fx.facade.status(job_id, ALICE).await.unwrap();
    assert_eq!(public.state, JobState::Failed);
    assert_eq!(public.start_time, Some(now));
}

#[tokio::test]
async fn deleted_job_is_no_longer_polled() {
    let fx = fixture(1, true);
    let mut poller = poller(&fx);
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();
    fx.facade.cancel(job_id, ALICE).await.unwrap();

    fx.status.set(job_id, EngineReport::Completed);
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary, TickSummary::default());
    assert_eq!(fx.status.calls(), 0);
}

// ---------------------------------------------------------------------------
// Engine outages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_engine_aborts_tick_and_keeps_jobs_queued() {
    let fx = fixture(2, false);
    let mut poller = poller(&fx);
    let first = fx.facade.submit(ALICE, "a.json").await.unwrap();
    let second = fx.facade.submit(ALICE, "b.json").await.unwrap();

    let summary = poller.tick(Utc::now()).await;
    assert!(summary.aborted);
    assert_eq!(summary.checked, 1, "tick must stop at the first engine failure");
    assert_eq!(summary.redispatched, 0);

    for job_id in [first, second] {
        let job = fx.registry.get(job_id, ALICE).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.dispatched_at, None);
    }
    assert_eq!(fx.status.calls(), 0);
}

#[tokio::test]
async fn status_outage_aborts_tick() {
    let fx = fixture(2, true);
    let mut poller = poller(&fx);
    fx.facade.submit(ALICE, "a.json").await.unwrap();
    fx.facade.submit(ALICE, "b.json").await.unwrap();

    fx.status.set_unreachable(true);
    let summary = poller.tick(Utc::now()).await;
    assert!(summary.aborted);
    assert_eq!(fx.status.calls(), 1);

    fx.status.set_unreachable(false);
    let summary = poller.tick(Utc::now()).await;
    assert!(!summary.aborted);
    assert_eq!(summary.checked, 2);
}

#[tokio::test]
async fn undelivered_job_is_resent_once_engine_is_back() {
    let fx = fixture(1, false);
    let mut poller = poller(&fx);
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();
    assert!(fx.engine.commands().is_empty());

    fx.engine.set_reachable(true);
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.redispatched, 1);
    assert_eq!(fx.engine.commands(), [format!("run {job_id} a.json")]);
    assert!(fx.registry.get(job_id, ALICE).await.unwrap().dispatched_at.is_some());

    // Already dispatched: the next tick asks for status instead.
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.redispatched, 0);
    assert_eq!(fx.status.calls(), 1);
    assert_eq!(fx.engine.commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn tick_during_first_launch_leaves_run_to_submit() {
    let fx = cold_fixture(1);
    let mut poller = poller(&fx);

    let facade = fx.facade.clone();
    let submit = tokio::spawn(async move { facade.submit(ALICE, "a.json").await });

    // Submit has created the job and is now waiting out the settle delay.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let jobs = fx.registry.active_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs.iter().next().unwrap().dispatched_at, None);

    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.redispatched, 0);
    assert!(!summary.aborted);

    let job_id = submit.await.unwrap().expect("submit");
    assert_eq!(fx.engine.commands(), [format!("run {job_id} a.json")]);

    // Once recorded, later ticks ask for status instead of re-sending.
    let summary = poller.tick(Utc::now()).await;
    assert_eq!(summary.redispatched, 0);
    assert_eq!(fx.status.calls(), 1);
    assert_eq!(fx.engine.commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_loop_survives_zero_interval() {
    let fx = fixture(1, true);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(poller(&fx).with_poll_interval(Duration::ZERO).run(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("poller should stop promptly")
        .expect("poller task should not panic");
}

#[tokio::test]
async fn stale_dispatched_job_stays_queued() {
    let fx = fixture(1, true);
    let mut poller = poller(&fx).with_stale_after(Duration::from_secs(60));
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();

    let later = Utc::now() + chrono::Duration::minutes(10);
    poller.tick(later).await;
    poller.tick(later).await;

    assert_eq!(fx.facade.status(job_id, ALICE).await.unwrap().state, JobState::Queued);
    assert_eq!(fx.status.calls(), 2);
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn run_loop_polls_until_cancelled() {
    let fx = fixture(1, true);
    let job_id = fx.facade.submit(ALICE, "a.json").await.unwrap();
    fx.status.set(job_id, EngineReport::Completed);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(
        poller(&fx)
            .with_poll_interval(Duration::from_secs(2))
            .run(cancel.clone()),
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fx.facade.status(job_id, ALICE).await.unwrap().state, JobState::Completed);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("poller should stop promptly")
        .expect("poller task should not panic");
}
