use std::time::Duration;

use spinw_engine::config::{env_or, ConfigError};
use spinw_engine::EngineConfig;

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Dispatched jobs without any engine report for this long get a warning.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// Service configuration loaded from environment variables.
///
/// All fields except the engine executable have defaults suitable for
/// running next to a local engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub engine: EngineConfig,
    /// Status poll period (default: `2` s).
    pub poll_interval: Duration,
    /// Staleness threshold for dispatched jobs (default: `600` s).
    pub stale_after: Duration,
    /// PostgreSQL URL. Without one the registry lives in memory.
    pub database_url: Option<String>,
    /// Job slots granted to users the in-memory store has not seen yet
    /// (default: `10`).
    pub default_quota_total: i32,
    /// Upper bound on waiting for background tasks at shutdown (default: `5` s).
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default        |
    /// |-------------------------|----------------|
    /// | `POLL_INTERVAL_SECS`    | `2` (non-zero) |
    /// | `STALE_AFTER_SECS`      | `600`          |
    /// | `DATABASE_URL`          | (unset)        |
    /// | `DEFAULT_QUOTA_TOTAL`   | `10`           |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `5`            |
    ///
    /// Engine settings come from [`EngineConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        Ok(Self {
            engine: EngineConfig::from_env()?,
            poll_interval: non_zero_secs("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            stale_after: Duration::from_secs(env_or(
                "STALE_AFTER_SECS",
                DEFAULT_STALE_AFTER.as_secs(),
            )?),
            database_url,
            default_quota_total: env_or("DEFAULT_QUOTA_TOTAL", 10)?,
            shutdown_timeout: Duration::from_secs(env_or("SHUTDOWN_TIMEOUT_SECS", 5)?),
        })
    }

    /// In-memory configuration around an engine config, using defaults.
    pub fn with_engine(engine: EngineConfig) -> Self {
        Self {
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            database_url: None,
            default_quota_total: 10,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Read a whole number of seconds from `var`, rejecting zero.
fn non_zero_secs(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let secs: u64 = env_or(var, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: secs.to_string(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        std::env::set_var("SPINW_TEST_ZERO_INTERVAL_SECS", "0");
        let err = non_zero_secs("SPINW_TEST_ZERO_INTERVAL_SECS", DEFAULT_POLL_INTERVAL).unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid { var: "SPINW_TEST_ZERO_INTERVAL_SECS", .. }
        );
    }

    #[test]
    fn interval_falls_back_and_parses() {
        assert_eq!(
            non_zero_secs("SPINW_TEST_UNSET_INTERVAL_SECS", DEFAULT_POLL_INTERVAL).unwrap(),
            Duration::from_secs(2)
        );

        std::env::set_var("SPINW_TEST_SET_INTERVAL_SECS", "7");
        assert_eq!(
            non_zero_secs("SPINW_TEST_SET_INTERVAL_SECS", DEFAULT_POLL_INTERVAL).unwrap(),
            Duration::from_secs(7)
        );
    }
}
