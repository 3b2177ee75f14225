use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, Txn, TxnOp, WatchStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use segment_assignment::{TableConfig, Topology};
use tokio::sync::mpsc;

use super::{AssignmentStore, TableEvent, Versioned, WATCH_CHANNEL_SIZE};
use crate::error::Result;
use crate::types::AssignmentRecord;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,
    /// Key prefix for all operations, e.g. "/segment-assigner/".
    pub prefix: String,
}

/// All etcd key patterns used by the assigner.
///
/// ```text
/// {prefix}config/tables/{table}
/// {prefix}topology/{table}
/// {prefix}assignments/{table}
/// ```
enum StoreKey<'a> {
    TableConfig(&'a str),
    Topology(&'a str),
    Assignment(&'a str),
}

impl StoreKey<'_> {
    fn resolve(&self, prefix: &str) -> String {
        match self {
            StoreKey::TableConfig(table) => format!("{prefix}config/tables/{table}"),
            StoreKey::Topology(table) => format!("{prefix}topology/{table}"),
            StoreKey::Assignment(table) => format!("{prefix}assignments/{table}"),
        }
    }
}

/// etcd-backed store. Every value is one JSON document.
///
/// `Client` is `Clone` (wraps an inner `Arc`), so each method clones it cheaply.
#[derive(Clone)]
pub struct EtcdAssignmentStore {
    client: Client,
    config: StoreConfig,
}

impl EtcdAssignmentStore {
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = Client::connect(&config.endpoints, None).await?;
        Ok(Self { client, config })
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    fn key(&self, k: StoreKey<'_>) -> String {
        k.resolve(&self.config.prefix)
    }

    async fn get_versioned<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, i64)>> {
        let resp = self.client.clone().get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => {
                let value = serde_json::from_slice(kv.value())?;
                Ok(Some((value, kv.version())))
            }
            None => Ok(None),
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.client.clone().put(key, value, None).await?;
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<WatchStream> {
        Ok(self.client.clone().watch(key, None).await?)
    }

    /// Delete all keys under the store's prefix. Useful for tests.
    pub async fn delete_all(&self) -> Result<()> {
        let options = DeleteOptions::new().with_prefix();
        self.client
            .clone()
            .delete(self.config.prefix.as_str(), Some(options))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for EtcdAssignmentStore {
    async fn get_table_config(&self, table: &str) -> Result<Option<TableConfig>> {
        let key = self.key(StoreKey::TableConfig(table));
        Ok(self.get_versioned(&key).await?.map(|(config, _)| config))
    }

    async fn put_table_config(&self, config: &TableConfig) -> Result<()> {
        let key = self.key(StoreKey::TableConfig(&config.table_name));
        self.put(&key, config).await
    }

    async fn get_topology(&self, table: &str) -> Result<Option<Topology>> {
        let key = self.key(StoreKey::Topology(table));
        Ok(self.get_versioned(&key).await?.map(|(topology, _)| topology))
    }

    async fn put_topology(&self, topology: &Topology) -> Result<()> {
        let key = self.key(StoreKey::Topology(&topology.table));
        self.put(&key, topology).await
    }

    async fn get_assignment(&self, table: &str) -> Result<Option<Versioned<AssignmentRecord>>> {
        let key = self.key(StoreKey::Assignment(table));
        Ok(self
            .get_versioned(&key)
            .await?
            .map(|(value, version)| Versioned { value, version }))
    }

    /// A missing key has etcd version 0, so `expected_version == 0` doubles as
    /// create-if-absent.
    async fn compare_and_put_assignment(
        &self,
        record: &AssignmentRecord,
        expected_version: i64,
    ) -> Result<bool> {
        let key = self.key(StoreKey::Assignment(&record.table));
        let txn = Txn::new()
            .when(vec![Compare::version(
                key.clone(),
                CompareOp::Equal,
                expected_version,
            )])
            .and_then(vec![TxnOp::put(key, serde_json::to_vec(record)?, None)]);
        let resp = self.client.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn watch_table(&self, table: &str) -> Result<mpsc::Receiver<TableEvent>> {
        let mut topology = self.watch(&self.key(StoreKey::Topology(table))).await?;
        let mut config = self.watch(&self.key(StoreKey::TableConfig(table))).await?;
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_SIZE);
        let table = table.to_string();

        tokio::spawn(async move {
            loop {
                let (msg, kind) = tokio::select! {
                    _ = tx.closed() => return,
                    msg = topology.message() => (msg, TableEvent::TopologyChanged),
                    msg = config.message() => (msg, TableEvent::ConfigChanged),
                };
                match msg {
                    Ok(Some(resp)) => {
                        if resp.events().is_empty() {
                            continue;
                        }
                        if tx.send(kind).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(table = %table, event = ?kind, "table watch stream ended");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(table = %table, event = ?kind, error = %e, "table watch failed");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
