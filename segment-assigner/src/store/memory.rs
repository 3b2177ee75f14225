use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use segment_assignment::{TableConfig, Topology};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use super::{AssignmentStore, TableEvent, Versioned, WATCH_CHANNEL_SIZE};
use crate::error::Result;
use crate::types::AssignmentRecord;

#[derive(Default)]
struct Tables {
    configs: HashMap<String, TableConfig>,
    topologies: HashMap<String, Topology>,
    assignments: HashMap<String, Versioned<AssignmentRecord>>,
    watchers: HashMap<String, Vec<mpsc::Sender<TableEvent>>>,
}

impl Tables {
    fn notify(&mut self, table: &str, event: TableEvent) {
        if let Some(senders) = self.watchers.get_mut(table) {
            senders.retain(|tx| match tx.try_send(event) {
                Ok(()) => true,
                // A full channel already holds an event that triggers the same work.
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(table, ?event, "watcher channel full, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        }
    }
}

/// Process-local store with the same versioning rules as etcd: a missing
/// key has version 0 and every write increments it.
///
/// Used by tests and single-process deployments.
#[derive(Clone, Default)]
pub struct MemoryAssignmentStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn get_table_config(&self, table: &str) -> Result<Option<TableConfig>> {
        Ok(self.tables.lock().await.configs.get(table).cloned())
    }

    async fn put_table_config(&self, config: &TableConfig) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .configs
            .insert(config.table_name.clone(), config.clone());
        tables.notify(&config.table_name, TableEvent::ConfigChanged);
        Ok(())
    }

    async fn get_topology(&self, table: &str) -> Result<Option<Topology>> {
        Ok(self.tables.lock().await.topologies.get(table).cloned())
    }

    async fn put_topology(&self, topology: &Topology) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .topologies
            .insert(topology.table.clone(), topology.clone());
        tables.notify(&topology.table, TableEvent::TopologyChanged);
        Ok(())
    }

    async fn get_assignment(&self, table: &str) -> Result<Option<Versioned<AssignmentRecord>>> {
        Ok(self.tables.lock().await.assignments.get(table).cloned())
    }

    async fn compare_and_put_assignment(
        &self,
        record: &AssignmentRecord,
        expected_version: i64,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .assignments
            .get(&record.table)
            .map_or(0, |v| v.version);
        if current != expected_version {
            return Ok(false);
        }
        tables.assignments.insert(
            record.table.clone(),
            Versioned {
                value: record.clone(),
                version: current + 1,
            },
        );
        Ok(true)
    }

    async fn watch_table(&self, table: &str) -> Result<mpsc::Receiver<TableEvent>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_SIZE);
        self.tables
            .lock()
            .await
            .watchers
            .entry(table.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
