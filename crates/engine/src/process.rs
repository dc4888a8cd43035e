//! Engine process supervision.
//!
//! [`EngineProcess`] owns the single engine child process. It is launched
//! as `[executable, work_folder, cores, port]` and configured with
//! `kill_on_drop`, so dropping the supervisor always tears the engine down
//! no matter how the service exits.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Outcome of [`ProcessSupervisor::ensure_running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// A live process was already there.
    AlreadyRunning,
    /// A new process was started and needs time to bind its listener.
    Started { pid: Option<u32> },
}

/// Lifecycle control over the engine process.
#[async_trait]
pub trait ProcessSupervisor: Send {
    /// Start the engine unless a live process already exists.
    async fn ensure_running(&mut self) -> Result<Launch, EngineError>;

    /// Whether the process is still running.
    fn is_alive(&mut self) -> bool;

    /// Forcibly stop the process. A no-op when nothing is running.
    async fn terminate(&mut self) -> Result<(), EngineError>;
}

/// Supervisor for the real engine executable.
pub struct EngineProcess {
    executable: PathBuf,
    args: Vec<String>,
    child: Option<Child>,
}

impl EngineProcess {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            args: vec![
                config.work_folder.display().to_string(),
                config.cores.to_string(),
                config.endpoint.port.to_string(),
            ],
            child: None,
        }
    }

    /// Positional arguments passed after the executable.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl ProcessSupervisor for EngineProcess {
    async fn ensure_running(&mut self) -> Result<Launch, EngineError> {
        if self.is_alive() {
            return Ok(Launch::AlreadyRunning);
        }

        let child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Launch {
                executable: self.executable.display().to_string(),
                source,
            })?;

        let pid = child.id();
        tracing::info!(
            pid,
            executable = %self.executable.display(),
            args = ?self.args,
            "Engine process launched",
        );
        self.child = Some(child);
        Ok(Launch::Started { pid })
    }

    fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!(%status, "Engine process has exited");
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll engine process status");
                false
            }
        }
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        if !self.is_alive() {
            self.child = None;
            return Ok(());
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let pid = child.id();
        child.kill().await?;
        tracing::info!(pid, "Engine process terminated");
        Ok(())
    }
}
