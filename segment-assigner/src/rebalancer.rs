use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use segment_assignment::RebalanceOptions;

use crate::driver::{DriverConfig, TableAssignmentDriver};
use crate::error::{Error, Result, StoreError};
use crate::store::{AssignmentStore, TableEvent};

#[derive(Debug, Clone)]
pub struct RebalancerConfig {
    pub options: RebalanceOptions,
    /// Pause between rebalance steps while replicas come online.
    pub poll_interval: Duration,
    /// How long to wait after the first table event before rebalancing,
    /// to batch bursts of topology updates into a single rebalance.
    pub debounce_interval: Duration,
    pub driver: DriverConfig,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            options: RebalanceOptions::default(),
            poll_interval: Duration::from_secs(1),
            debounce_interval: Duration::from_secs(1),
            driver: DriverConfig::default(),
        }
    }
}

/// Keeps one table's assignment converged with its topology.
pub struct TableRebalancer<S: AssignmentStore + ?Sized> {
    store: Arc<S>,
    table: String,
    config: RebalancerConfig,
}

impl<S: AssignmentStore + ?Sized> TableRebalancer<S> {
    pub fn new(store: Arc<S>, table: impl Into<String>, config: RebalancerConfig) -> Self {
        Self {
            store,
            table: table.into(),
            config,
        }
    }

    /// Rebalance now, then again after every (debounced) topology or config
    /// change, until cancelled. Fails if the watch ends or a step fails
    /// with something other than a placement problem.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        // Watch before the first read so no change slips in between.
        let mut events = self.store.watch_table(&self.table).await?;
        let mut driver = self.load_driver().await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = events.recv() => {
                    let event = event.ok_or_else(|| Error::invalid_state("table watch stream ended"))?;
                    if self.debounce(&mut events, event, &cancel).await? {
                        driver = self.reload(driver).await?;
                    }
                    continue;
                }
                result = driver.rebalance_until_converged(
                    &self.config.options,
                    self.config.poll_interval,
                    &cancel,
                ) => {
                    match result {
                        Ok(report) => tracing::info!(
                            table = %self.table,
                            status = ?report.status,
                            topology_version = report.topology_version,
                            unsatisfied = report.unsatisfied.len(),
                            "rebalance settled"
                        ),
                        Err(Error::Assignment(e)) => {
                            tracing::error!(table = %self.table, error = %e, "rebalance rejected");
                        }
                        Err(Error::ConflictRetriesExhausted { attempts, .. }) => {
                            tracing::warn!(table = %self.table, attempts, "rebalance kept conflicting");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            // Settled: nothing to do until the table changes.
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = events.recv() => {
                    let event = event.ok_or_else(|| Error::invalid_state("table watch stream ended"))?;
                    if self.debounce(&mut events, event, &cancel).await? {
                        driver = self.reload(driver).await?;
                    }
                }
            }
        }
    }

    async fn load_driver(&self) -> Result<TableAssignmentDriver<S>> {
        TableAssignmentDriver::init_from_store(
            Arc::clone(&self.store),
            &self.table,
            self.config.driver.clone(),
        )
        .await
    }

    /// Rebind to the stored config. A config the engine rejects is logged and
    /// the previous one kept.
    async fn reload(&self, current: TableAssignmentDriver<S>) -> Result<TableAssignmentDriver<S>> {
        match self.load_driver().await {
            Ok(driver) => {
                tracing::info!(table = %self.table, "reloaded table config");
                Ok(driver)
            }
            Err(
                e @ (Error::Assignment(_) | Error::NotFound(_) | Error::Store(StoreError::Serde(_))),
            ) => {
                tracing::error!(table = %self.table, error = %e, "keeping previous table config");
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    /// Drain events arriving within the debounce window. Returns whether any
    /// of them changed the table config.
    async fn debounce(
        &self,
        events: &mut mpsc::Receiver<TableEvent>,
        first: TableEvent,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut config_changed = first == TableEvent::ConfigChanged;
        let deadline = tokio::time::Instant::now() + self.config.debounce_interval;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(config_changed),
                _ = tokio::time::sleep_until(deadline) => return Ok(config_changed),
                event = events.recv() => {
                    let event = event.ok_or_else(|| Error::invalid_state("table watch stream ended"))?;
                    tracing::debug!(table = %self.table, event = ?event, "table changed");
                    config_changed |= event == TableEvent::ConfigChanged;
                }
            }
        }
    }
}
