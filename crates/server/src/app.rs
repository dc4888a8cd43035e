//! Service assembly and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use spinw_core::registry::JobRegistry;
use spinw_core::store::{JobStore, UserStore};
use spinw_db::{MemoryStore, PgStore};
use spinw_engine::{EngineConnection, EngineStatusSource, StatusSource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::facade::DispatchFacade;
use crate::poller::StatusPoller;

/// The running service: registry, engine connection and status poller.
pub struct App {
    registry: Arc<JobRegistry>,
    engine: Arc<EngineConnection>,
    facade: DispatchFacade,
    cancel: CancellationToken,
    poller_handle: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl App {
    /// Open storage, create the engine connection and spawn the poller.
    ///
    /// The engine itself is launched lazily by the first command.
    pub async fn start(config: ServerConfig) -> Result<Self, AppError> {
        let (jobs, users) = open_store(&config).await?;
        let registry = Arc::new(JobRegistry::new(jobs, users));

        let engine = Arc::new(EngineConnection::new(&config.engine));
        tracing::info!(
            endpoint = %engine.endpoint(),
            executable = %config.engine.executable.display(),
            "Engine connection manager created",
        );

        let status: Arc<dyn StatusSource> = Arc::new(EngineStatusSource::new(
            Arc::clone(&engine),
            config.engine.work_folder.clone(),
        ));

        Ok(Self::with_parts(&config, registry, engine, status))
    }

    /// Assemble the service from already built components.
    pub fn with_parts(
        config: &ServerConfig,
        registry: Arc<JobRegistry>,
        engine: Arc<EngineConnection>,
        status: Arc<dyn StatusSource>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let poller = StatusPoller::new(Arc::clone(&registry), Arc::clone(&engine), status)
            .with_poll_interval(config.poll_interval)
            .with_stale_after(config.stale_after);
        let poller_handle = tokio::spawn(poller.run(cancel.clone()));

        let facade = DispatchFacade::new(Arc::clone(&registry), Arc::clone(&engine));

        Self {
            registry,
            engine,
            facade,
            cancel,
            poller_handle,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn facade(&self) -> &DispatchFacade {
        &self.facade
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<EngineConnection> {
        &self.engine
    }

    /// Stop the poller, then close the socket and terminate the engine.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if tokio::time::timeout(self.shutdown_timeout, self.poller_handle)
            .await
            .is_err()
        {
            tracing::warn!("Status poller did not stop in time");
        }
        tracing::info!("Status poller stopped");

        self.engine.shutdown().await;
        tracing::info!("Engine shut down");
    }
}

async fn open_store(
    config: &ServerConfig,
) -> Result<(Arc<dyn JobStore>, Arc<dyn UserStore>), AppError> {
    match &config.database_url {
        Some(url) => {
            let pool = spinw_db::create_pool(url).await?;
            tracing::info!("Database connection pool created");

            spinw_db::health_check(&pool).await?;
            tracing::info!("Database health check passed");

            spinw_db::run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");

            let store = Arc::new(PgStore::new(pool));
            Ok((store.clone(), store))
        }
        None => {
            tracing::info!(
                default_quota_total = config.default_quota_total,
                "No DATABASE_URL set, keeping jobs in memory",
            );
            let store =
                Arc::new(MemoryStore::new().with_default_quota(config.default_quota_total));
            Ok((store.clone(), store))
        }
    }
}
