mod etcd;
mod memory;

pub use etcd::{EtcdAssignmentStore, StoreConfig};
pub use memory::MemoryAssignmentStore;

use async_trait::async_trait;
use segment_assignment::{TableConfig, Topology};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::AssignmentRecord;

/// Buffer size for table watch channels. A full buffer only drops events
/// that would trigger the same rebalance as one already queued.
pub const WATCH_CHANNEL_SIZE: usize = 64;

/// A stored value together with the store's version of its key.
///
/// Version 0 means the key does not exist; every write bumps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEvent {
    TopologyChanged,
    ConfigChanged,
}

/// Authoritative storage for table configs, topologies and assignments.
///
/// Assignments are only ever written through a conditional write on the
/// record's version, which is what serializes concurrent writers of one
/// table.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get_table_config(&self, table: &str) -> Result<Option<TableConfig>>;

    async fn put_table_config(&self, config: &TableConfig) -> Result<()>;

    async fn get_topology(&self, table: &str) -> Result<Option<Topology>>;

    async fn put_topology(&self, topology: &Topology) -> Result<()>;

    async fn get_assignment(&self, table: &str) -> Result<Option<Versioned<AssignmentRecord>>>;

    /// Write `record` only if its key is still at `expected_version`
    /// (0 = must not exist). Returns `Ok(false)` when another writer got
    /// there first.
    async fn compare_and_put_assignment(
        &self,
        record: &AssignmentRecord,
        expected_version: i64,
    ) -> Result<bool>;

    /// Stream of changes to the table's topology and config. The stream ends
    /// when the underlying watch fails.
    async fn watch_table(&self, table: &str) -> Result<mpsc::Receiver<TableEvent>>;
}
