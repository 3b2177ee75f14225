#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use segment_assignment::{
    PartitionGroup, RebalanceOptions, SegmentState, TableConfig, Topology,
};
use segment_assigner::driver::{
    DriverConfig, RebalanceReport, RebalanceStatus, TableAssignmentDriver,
};
use segment_assigner::error::{Error, Result};
use segment_assigner::store::{
    AssignmentStore, EtcdAssignmentStore, MemoryAssignmentStore, StoreConfig, TableEvent,
    Versioned,
};
use segment_assigner::types::AssignmentRecord;

pub const TABLE: &str = "events";
pub const ETCD_ENDPOINT: &str = "http://localhost:2379";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const MAX_STEPS: usize = 50;

pub async fn test_store(test_name: &str) -> Arc<EtcdAssignmentStore> {
    let prefix = format!("/test-{}-{}/", test_name, uuid::Uuid::new_v4());
    let config = StoreConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        prefix,
    };
    let store = EtcdAssignmentStore::connect(config)
        .await
        .expect("failed to connect to etcd");
    Arc::new(store)
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}

pub fn flat_topology(version: u64, instances: &[&str]) -> Topology {
    Topology::new(TABLE, version).with_partition_group(PartitionGroup::flat(0, instances))
}

/// Store the table config and topology and bind a driver to them.
pub async fn setup_table<S: AssignmentStore + ?Sized>(
    store: &Arc<S>,
    config: TableConfig,
    topology: &Topology,
) -> TableAssignmentDriver<S> {
    store.put_table_config(&config).await.unwrap();
    store.put_topology(topology).await.unwrap();
    TableAssignmentDriver::init_from_store(Arc::clone(store), TABLE, DriverConfig::default())
        .await
        .unwrap()
}

/// Assign `count` segments named seg0..segN and bring every replica online.
pub async fn seed_segments<S: AssignmentStore + ?Sized>(
    driver: &TableAssignmentDriver<S>,
    count: usize,
) {
    for i in 0..count {
        driver.assign_new_segment(&format!("seg{i}")).await.unwrap();
    }
    bring_online(driver).await;
}

/// Simulate servers finishing their loads: every OFFLINE replica reports ONLINE.
pub async fn bring_online<S: AssignmentStore + ?Sized>(driver: &TableAssignmentDriver<S>) {
    let assignment = driver.assignment().await.unwrap();
    for (segment, states) in &assignment {
        for (instance, state) in states {
            if *state != SegmentState::Offline {
                continue;
            }
            // A concurrent rebalance may have dropped the replica meanwhile.
            match driver
                .report_replica_state(segment, instance, SegmentState::Online)
                .await
            {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => panic!("failed to report {segment} on {instance}: {e}"),
            }
        }
    }
}

/// Step the rebalance, bringing replicas online between steps, until it
/// converges. `after_step` sees the stored assignment after every write.
pub async fn drive_to_convergence<S, F>(
    driver: &TableAssignmentDriver<S>,
    options: &RebalanceOptions,
    mut after_step: F,
) -> Vec<RebalanceReport>
where
    S: AssignmentStore + ?Sized,
    F: FnMut(&segment_assignment::SegmentAssignment),
{
    let mut reports = Vec::new();
    for _ in 0..MAX_STEPS {
        let report = driver.rebalance_step(options).await.unwrap();
        let status = report.status;
        reports.push(report);
        after_step(&driver.assignment().await.unwrap());
        match status {
            RebalanceStatus::Converged => return reports,
            RebalanceStatus::DryRun => panic!("dry run cannot converge"),
            RebalanceStatus::WaveApplied | RebalanceStatus::AwaitingConvergence => {
                bring_online(driver).await;
            }
        }
    }
    panic!("rebalance did not converge within {MAX_STEPS} steps");
}

// ── Fault injection ─────────────────────────────────────────────

/// Memory store that loses the first `conflicts` conditional writes and
/// serves a topology at version 0 for the first `stale_reads` reads.
pub struct FlakyStore {
    inner: MemoryAssignmentStore,
    conflicts: AtomicUsize,
    stale_reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryAssignmentStore) -> Self {
        Self {
            inner,
            conflicts: AtomicUsize::new(0),
            stale_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_conflicts(self, n: usize) -> Self {
        self.conflicts.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_stale_reads(self, n: usize) -> Self {
        self.stale_reads.store(n, Ordering::SeqCst);
        self
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AssignmentStore for FlakyStore {
    async fn get_table_config(&self, table: &str) -> Result<Option<TableConfig>> {
        self.inner.get_table_config(table).await
    }

    async fn put_table_config(&self, config: &TableConfig) -> Result<()> {
        self.inner.put_table_config(config).await
    }

    async fn get_topology(&self, table: &str) -> Result<Option<Topology>> {
        let topology = self.inner.get_topology(table).await?;
        if Self::take(&self.stale_reads) {
            return Ok(topology.map(|t| Topology { version: 0, ..t }));
        }
        Ok(topology)
    }

    async fn put_topology(&self, topology: &Topology) -> Result<()> {
        self.inner.put_topology(topology).await
    }

    async fn get_assignment(&self, table: &str) -> Result<Option<Versioned<AssignmentRecord>>> {
        self.inner.get_assignment(table).await
    }

    async fn compare_and_put_assignment(
        &self,
        record: &AssignmentRecord,
        expected_version: i64,
    ) -> Result<bool> {
        if Self::take(&self.conflicts) {
            return Ok(false);
        }
        self.inner
            .compare_and_put_assignment(record, expected_version)
            .await
    }

    async fn watch_table(&self, table: &str) -> Result<mpsc::Receiver<TableEvent>> {
        self.inner.watch_table(table).await
    }
}
