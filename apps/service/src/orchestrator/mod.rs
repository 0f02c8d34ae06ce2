/// Orchestrator module - wires the monitor together
///
/// The orchestrator owns startup and the main loop:
/// - Opens the database and brings its schema up to date
/// - Resolves every configured target to its durable id
/// - Builds the prober and the cycle scheduler and runs it until shutdown
///
/// Every failure during startup is fatal, once the loop runs nothing is.


use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, TargetConfig};
use crate::database::models::{ResultRow, TargetRow};
use crate::database::{LibsqlStorage, Storage, bootstrap_schema, open_database};
use crate::monitoring::prober::ProbeFacility;
use crate::monitoring::{CycleScheduler, Prober, SystemPing};
use crate::registry::TargetRegistry;

/// Main orchestrator for the linkwatch service
pub struct Orchestrator {
    config: Arc<Config>,
    scheduler: CycleScheduler,
}

impl Orchestrator {
    /// Create and run an orchestrator until `shutdown` resolves
    pub async fn start(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut orchestrator = Self::new(config).await?;
        orchestrator.run(shutdown).await;
        Ok(())
    }

    /// Connect to the configured database and resolve all targets
    pub async fn new(config: Config) -> Result<Self> {
        let storage = open_storage(&config).await?;
        let facility = Arc::new(SystemPing::new(config.probe.program.clone()));
        Self::with_parts(config, storage, facility).await
    }

    /// Build an orchestrator around an already prepared storage and probe facility
    pub async fn with_parts(
        config: Config,
        storage: Arc<dyn Storage>,
        facility: Arc<dyn ProbeFacility>,
    ) -> Result<Self> {
        let config = Arc::new(config);

        info!("Registering {} targets...", config.targets.len());
        let targets = TargetRegistry::new(storage.clone()).resolve_all(&config.targets).await?;

        let prober = Arc::new(Prober::new(facility, config.probe.attempts, config.probe.timeout()));
        let scheduler =
            CycleScheduler::new(targets, prober, storage, config.interval(), config.probe.deadline());

        Ok(Self { config, scheduler })
    }

    /// Poll until `shutdown` resolves
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        self.log_start();
        self.scheduler.run_until(shutdown).await;
    }

    /// Poll for a fixed number of cycles
    pub async fn run_cycles(&mut self, cycles: u64) {
        self.log_start();
        self.scheduler.run_cycles(cycles).await;
    }

    fn log_start(&self) {
        let targets = self
            .scheduler
            .targets()
            .iter()
            .map(|target| target.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        info!("Pinging {} every {}s", targets, self.config.ping_interval_seconds);
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &CycleScheduler {
        &self.scheduler
    }
}

/// Open the configured database and bring its schema up to date
pub async fn open_storage(config: &Config) -> Result<Arc<LibsqlStorage>> {
    let location = config.database.location()?;

    info!("Opening database...");
    let database = open_database(&location).await?;
    let storage = LibsqlStorage::new(database, config.database.max_connections)?;

    let conn = storage.get_conn().await.context("Initial database connection failed")?;
    info!("Initializing database schema...");
    bootstrap_schema(&conn, config.database.bootstrap_sql_path().as_deref())
        .await
        .context("Schema bootstrap failed")?;
    drop(conn);

    Ok(Arc::new(storage))
}

/// Stored history of each configured target, most recent results first
pub async fn history(
    storage: Arc<dyn Storage>,
    targets: &[TargetConfig],
    limit: usize,
) -> Result<Vec<(TargetRow, Vec<ResultRow>)>> {
    let targets = TargetRegistry::new(storage.clone()).resolve_all(targets).await?;

    let mut history = Vec::with_capacity(targets.len());
    for target in targets {
        let row = storage
            .get_target(target.id)
            .await?
            .with_context(|| format!("Target {} disappeared from the database", target))?;
        let results = storage.recent_results(target.id, limit).await?;
        history.push((row, results));
    }
    Ok(history)
}
