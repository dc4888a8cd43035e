//! Job progress reported by the engine.
//!
//! The command socket carries no responses. Instead the engine keeps one
//! report file per job at `<work_folder>/<job_id>/status`, refreshed when
//! it receives a `status <job_id>` command. The file holds a single line:
//!
//! ```text
//! queued
//! running [rfc3339 start time]
//! completed
//! failed
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spinw_core::types::{JobId, Timestamp};

use crate::command::EngineCommand;
use crate::connection::EngineConnection;
use crate::error::EngineError;

/// Name of the per-job report file inside the job folder.
pub const REPORT_FILE: &str = "status";

/// Progress signal for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineReport {
    /// The engine started the job, optionally saying when.
    Running { started_at: Option<Timestamp> },
    Completed,
    Failed,
}

/// Where the status poller gets engine progress from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Latest report for a job, or `None` if the engine has not picked it
    /// up yet.
    async fn report(&self, job_id: JobId) -> Result<Option<EngineReport>, EngineError>;
}

/// Path of the report file for `job_id`.
pub fn report_path(work_folder: &Path, job_id: JobId) -> PathBuf {
    work_folder.join(job_id.to_string()).join(REPORT_FILE)
}

/// Parse the contents of a report file.
pub fn parse_report(job_id: JobId, text: &str) -> Result<Option<EngineReport>, EngineError> {
    let mut parts = text.split_whitespace();
    let invalid = |reason: String| EngineError::Report { job_id, reason };

    let report = match parts.next() {
        None | Some("queued") => None,
        Some("running") => {
            let started_at = parts
                .next()
                .map(|raw| {
                    DateTime::parse_from_rfc3339(raw)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| invalid(format!("bad start time '{raw}': {e}")))
                })
                .transpose()?;
            Some(EngineReport::Running { started_at })
        }
        Some("completed") => Some(EngineReport::Completed),
        Some("failed") => Some(EngineReport::Failed),
        Some(other) => return Err(invalid(format!("unknown status '{other}'"))),
    };
    Ok(report)
}

/// Status source that asks the engine over the command channel and reads
/// the report file it maintains in the shared work folder.
pub struct EngineStatusSource {
    connection: Arc<EngineConnection>,
    work_folder: PathBuf,
}

impl EngineStatusSource {
    pub fn new(connection: Arc<EngineConnection>, work_folder: impl Into<PathBuf>) -> Self {
        Self {
            connection,
            work_folder: work_folder.into(),
        }
    }
}

#[async_trait]
impl StatusSource for EngineStatusSource {
    async fn report(&self, job_id: JobId) -> Result<Option<EngineReport>, EngineError> {
        self.connection.send(&EngineCommand::Status { job_id }).await?;

        let path = report_path(&self.work_folder, job_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_report(job_id, &text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
