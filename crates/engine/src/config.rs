//! Engine launch and connection settings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Port the engine listens on unless `ENGINE_PORT` says otherwise.
pub const DEFAULT_PORT: u16 = 13001;

/// Time the engine needs after launch to bind its listener.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(5);

/// Pause between tearing down a broken channel and reconnecting.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

/// Upper bound on a single TCP connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `host:port` of the engine command socket. Fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What to do with the engine process when a command write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Kill and relaunch the process on every write failure.
    #[default]
    Always,
    /// Only relaunch when the process has actually exited; a live process
    /// just gets a fresh socket.
    WhenExited,
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "when_exited" | "when-exited" => Ok(Self::WhenExited),
            other => Err(format!("unknown restart policy '{other}'")),
        }
    }
}

/// Everything needed to launch the engine and reach its command socket.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine executable, launched as `[executable, work_folder, cores, port]`.
    pub executable: PathBuf,
    /// Folder shared with the engine for inputs and status reports.
    pub work_folder: PathBuf,
    /// Worker cores handed to the engine.
    pub cores: u32,
    pub endpoint: Endpoint,
    pub settle: Duration,
    pub cooldown: Duration,
    pub connect_timeout: Duration,
    pub restart_policy: RestartPolicy,
}

impl EngineConfig {
    /// Configuration with default timings for an engine on localhost.
    pub fn new(executable: impl Into<PathBuf>, work_folder: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            work_folder: work_folder.into(),
            cores: 1,
            endpoint: Endpoint::new("127.0.0.1", DEFAULT_PORT),
            settle: DEFAULT_SETTLE,
            cooldown: DEFAULT_COOLDOWN,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            restart_policy: RestartPolicy::default(),
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default     |
    /// |-------------------------|-------------|
    /// | `ENGINE_EXECUTABLE`     | (required)  |
    /// | `ENGINE_WORK_FOLDER`    | `uploads`   |
    /// | `ENGINE_CORES`          | `1`         |
    /// | `ENGINE_HOST`           | `127.0.0.1` |
    /// | `ENGINE_PORT`           | `13001`     |
    /// | `ENGINE_SETTLE_SECS`    | `5`         |
    /// | `ENGINE_COOLDOWN_SECS`  | `1`         |
    /// | `ENGINE_CONNECT_TIMEOUT_SECS` | `10`  |
    /// | `ENGINE_RESTART_POLICY` | `always`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let executable = std::env::var("ENGINE_EXECUTABLE")
            .map_err(|_| ConfigError::Missing("ENGINE_EXECUTABLE"))?;
        let work_folder: String = env_or("ENGINE_WORK_FOLDER", "uploads".to_string())?;

        Ok(Self {
            executable: executable.into(),
            work_folder: work_folder.into(),
            cores: env_or("ENGINE_CORES", 1)?,
            endpoint: Endpoint::new(
                env_or("ENGINE_HOST", "127.0.0.1".to_string())?,
                env_or("ENGINE_PORT", DEFAULT_PORT)?,
            ),
            settle: Duration::from_secs(env_or("ENGINE_SETTLE_SECS", DEFAULT_SETTLE.as_secs())?),
            cooldown: Duration::from_secs(env_or(
                "ENGINE_COOLDOWN_SECS",
                DEFAULT_COOLDOWN.as_secs(),
            )?),
            connect_timeout: Duration::from_secs(env_or(
                "ENGINE_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT.as_secs(),
            )?),
            restart_policy: env_or("ENGINE_RESTART_POLICY", RestartPolicy::default())?,
        })
    }
}

/// Read `var` and parse it, falling back to `default` when unset.
pub fn env_or<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
