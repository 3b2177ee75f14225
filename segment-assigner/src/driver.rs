use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use segment_assignment::plan;
use segment_assignment::{
    AssignmentError, InstanceId, RebalanceOptions, SegmentAssignment, SegmentAssignmentEngine,
    SegmentState, TableConfig, Topology, TransitionOp, TransitionPlan, UnsatisfiedSegment,
};

use crate::error::{Error, Result};
use crate::metrics_consts::{
    OPERATIONS_APPLIED_COUNTER, PENDING_OPERATIONS_GAUGE, REBALANCE_COMPUTE_DURATION_HISTOGRAM,
    SEGMENTS_ASSIGNED_COUNTER, STALE_TOPOLOGY_COUNTER, UNSATISFIED_SEGMENTS_GAUGE,
    WAVES_APPLIED_COUNTER, WRITE_CONFLICTS_COUNTER,
};
use crate::store::{AssignmentStore, Versioned};
use crate::types::AssignmentRecord;
use crate::util;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Read-compute-write attempts before giving up on a conflicting or
    /// stale table.
    pub max_write_attempts: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceStatus {
    Converged,
    WaveApplied,
    AwaitingConvergence,
    DryRun,
}

/// Outcome of one rebalance step.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
    pub status: RebalanceStatus,
    pub topology_version: u64,
    pub target: SegmentAssignment,
    /// Full plan as computed before anything was written.
    pub plan: TransitionPlan,
    /// Operations written by this step. Empty unless `status` is `WaveApplied`.
    pub applied: Vec<TransitionOp>,
    pub unsatisfied: Vec<UnsatisfiedSegment>,
}

impl RebalanceReport {
    /// Operations still to be applied by later steps.
    pub fn pending_ops(&self) -> usize {
        self.plan.len() - self.applied.len()
    }
}

struct Snapshot {
    topology: Topology,
    record: Versioned<AssignmentRecord>,
}

impl Snapshot {
    /// A topology older than the one the last writer planned against means
    /// our read raced a topology update. Re-reading cures it.
    fn staleness(&self) -> Option<AssignmentError> {
        let planned = self.record.value.topology_version;
        (self.topology.version < planned).then_some(AssignmentError::StaleTopology {
            version: self.topology.version,
            min_version: planned,
        })
    }

    /// Record to write back: same table, stamped with the newest topology
    /// version seen.
    fn next_record(&self, segments: SegmentAssignment) -> AssignmentRecord {
        AssignmentRecord {
            table: self.record.value.table.clone(),
            topology_version: self
                .record
                .value
                .topology_version
                .max(self.topology.version),
            segments,
            updated_at: util::now_seconds(),
        }
    }
}

/// Applies engine results for one table through conditional writes.
///
/// Every write is read-compute-write against the record's store version. A
/// lost race discards the computed result and starts over from fresh
/// snapshots, so concurrent drivers of the same table never overwrite each
/// other.
pub struct TableAssignmentDriver<S: AssignmentStore + ?Sized> {
    store: Arc<S>,
    engine: SegmentAssignmentEngine,
    config: DriverConfig,
}

impl<S: AssignmentStore + ?Sized> TableAssignmentDriver<S> {
    pub fn init(store: Arc<S>, table_config: TableConfig, config: DriverConfig) -> Result<Self> {
        util::validate_table_name(&table_config.table_name)?;
        let engine = SegmentAssignmentEngine::init(table_config)?;
        Ok(Self {
            store,
            engine,
            config,
        })
    }

    /// Bind to the table config currently held by the store.
    pub async fn init_from_store(store: Arc<S>, table: &str, config: DriverConfig) -> Result<Self> {
        util::validate_table_name(table)?;
        let table_config = store
            .get_table_config(table)
            .await?
            .ok_or_else(|| Error::NotFound(format!("table config for {table}")))?;
        Self::init(store, table_config, config)
    }

    pub fn table(&self) -> &str {
        &self.engine.config().table_name
    }

    pub fn engine(&self) -> &SegmentAssignmentEngine {
        &self.engine
    }

    fn attempts(&self) -> usize {
        self.config.max_write_attempts.max(1)
    }

    async fn load_record(&self) -> Result<Versioned<AssignmentRecord>> {
        Ok(self
            .store
            .get_assignment(self.table())
            .await?
            .unwrap_or_else(|| Versioned {
                value: AssignmentRecord::empty(self.table()),
                version: 0,
            }))
    }

    async fn load_snapshot(&self) -> Result<Snapshot> {
        let topology = self
            .store
            .get_topology(self.table())
            .await?
            .ok_or_else(|| Error::NotFound(format!("topology for {}", self.table())))?;
        let record = self.load_record().await?;
        Ok(Snapshot { topology, record })
    }

    /// Current assignment as stored. Empty if nothing was written yet.
    pub async fn assignment(&self) -> Result<SegmentAssignment> {
        Ok(self.load_record().await?.value.segments)
    }

    fn record_stale(&self, err: &AssignmentError, attempt: usize) {
        metrics::counter!(STALE_TOPOLOGY_COUNTER, "table" => self.table().to_string())
            .increment(1);
        tracing::warn!(table = %self.table(), attempt, error = %err, "stale topology, re-reading");
    }

    fn record_conflict(&self, attempt: usize) {
        metrics::counter!(WRITE_CONFLICTS_COUNTER, "table" => self.table().to_string())
            .increment(1);
        tracing::warn!(table = %self.table(), attempt, "assignment write conflict, retrying");
    }

    fn exhausted(&self, stale: Option<AssignmentError>) -> Error {
        match stale {
            Some(err) => err.into(),
            None => Error::ConflictRetriesExhausted {
                table: self.table().to_string(),
                attempts: self.attempts(),
            },
        }
    }

    /// Place a newly created segment and persist its replicas as OFFLINE.
    ///
    /// Idempotent: a segment that is already assigned is left alone and its
    /// current instances are returned in id order.
    pub async fn assign_new_segment(&self, segment: &str) -> Result<Vec<InstanceId>> {
        let mut stale = None;

        for attempt in 1..=self.attempts() {
            let snapshot = self.load_snapshot().await?;
            let current = &snapshot.record.value.segments;

            if let Some(states) = current.get(segment) {
                tracing::debug!(table = %self.table(), segment, "segment already assigned");
                return Ok(states.keys().cloned().collect());
            }

            if let Some(err) = snapshot.staleness() {
                self.record_stale(&err, attempt);
                stale = Some(err);
                continue;
            }

            let instances = match self
                .engine
                .assign_segment(segment, current, &snapshot.topology)
            {
                Ok(instances) => instances,
                Err(err @ AssignmentError::StaleTopology { .. }) => {
                    self.record_stale(&err, attempt);
                    stale = Some(err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let mut segments = current.clone();
            segments.insert(
                segment.to_string(),
                instances
                    .iter()
                    .map(|instance| (instance.clone(), SegmentState::Offline))
                    .collect(),
            );
            let record = snapshot.next_record(segments);

            if self
                .store
                .compare_and_put_assignment(&record, snapshot.record.version)
                .await?
            {
                metrics::counter!(SEGMENTS_ASSIGNED_COUNTER, "table" => self.table().to_string())
                    .increment(1);
                tracing::info!(
                    table = %self.table(),
                    segment,
                    instances = ?instances,
                    "assigned new segment"
                );
                return Ok(instances);
            }

            stale = None;
            self.record_conflict(attempt);
        }

        Err(self.exhausted(stale))
    }

    /// Compute a rebalance and write at most its first wave.
    ///
    /// Nothing is written while replicas kept by the target are still
    /// OFFLINE: the next step recomputes once they serve.
    pub async fn rebalance_step(&self, options: &RebalanceOptions) -> Result<RebalanceReport> {
        let mut stale = None;

        for attempt in 1..=self.attempts() {
            let snapshot = self.load_snapshot().await?;
            if let Some(err) = snapshot.staleness() {
                self.record_stale(&err, attempt);
                stale = Some(err);
                continue;
            }

            let current = &snapshot.record.value.segments;
            let started = Instant::now();
            let result = match self
                .engine
                .rebalance_table(current, &snapshot.topology, options)
            {
                Ok(result) => result,
                Err(err @ AssignmentError::StaleTopology { .. }) => {
                    self.record_stale(&err, attempt);
                    stale = Some(err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            metrics::histogram!(REBALANCE_COMPUTE_DURATION_HISTOGRAM, "table" => self.table().to_string())
                .record(started.elapsed().as_secs_f64());
            metrics::gauge!(UNSATISFIED_SEGMENTS_GAUGE, "table" => self.table().to_string())
                .set(result.unsatisfied.len() as f64);

            let mut report = RebalanceReport {
                status: RebalanceStatus::Converged,
                topology_version: snapshot.topology.version,
                target: result.target.clone(),
                plan: result.plan.clone(),
                applied: Vec::new(),
                unsatisfied: result.unsatisfied.clone(),
            };

            if result.is_converged() {
                metrics::gauge!(PENDING_OPERATIONS_GAUGE, "table" => self.table().to_string())
                    .set(0.0);
                return Ok(report);
            }
            if options.dry_run {
                report.status = RebalanceStatus::DryRun;
                tracing::info!(
                    table = %self.table(),
                    waves = result.plan.waves().len(),
                    operations = result.plan.len(),
                    unsatisfied = result.unsatisfied.len(),
                    "dry run, plan not applied"
                );
                return Ok(report);
            }

            let wave = match result.plan.first_wave() {
                Some(wave) if !result.plan.awaiting_convergence() => wave,
                _ => {
                    report.status = RebalanceStatus::AwaitingConvergence;
                    metrics::gauge!(PENDING_OPERATIONS_GAUGE, "table" => self.table().to_string())
                        .set(report.pending_ops() as f64);
                    tracing::debug!(table = %self.table(), "waiting for replicas to come online");
                    return Ok(report);
                }
            };

            let mut segments = current.clone();
            plan::apply(&mut segments, wave);
            let record = snapshot.next_record(segments);

            if self
                .store
                .compare_and_put_assignment(&record, snapshot.record.version)
                .await?
            {
                report.status = RebalanceStatus::WaveApplied;
                report.applied = wave.to_vec();

                metrics::counter!(WAVES_APPLIED_COUNTER, "table" => self.table().to_string())
                    .increment(1);
                metrics::counter!(OPERATIONS_APPLIED_COUNTER, "table" => self.table().to_string())
                    .increment(wave.len() as u64);
                metrics::gauge!(PENDING_OPERATIONS_GAUGE, "table" => self.table().to_string())
                    .set(report.pending_ops() as f64);
                tracing::info!(
                    table = %self.table(),
                    topology_version = snapshot.topology.version,
                    applied = wave.len(),
                    pending = report.pending_ops(),
                    "applied rebalance wave"
                );
                return Ok(report);
            }

            stale = None;
            self.record_conflict(attempt);
        }

        Err(self.exhausted(stale))
    }

    /// Step the rebalance until it converges (or only reports, for a dry run),
    /// sleeping `poll_interval` between steps. Cancellation returns the last
    /// report.
    pub async fn rebalance_until_converged(
        &self,
        options: &RebalanceOptions,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<RebalanceReport> {
        loop {
            let report = self.rebalance_step(options).await?;
            if matches!(
                report.status,
                RebalanceStatus::Converged | RebalanceStatus::DryRun
            ) {
                return Ok(report);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(report),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Record a replica state reported by the instance hosting it, e.g. ONLINE
    /// once an OFFLINE replica finished loading, or ERROR when loading failed.
    pub async fn report_replica_state(
        &self,
        segment: &str,
        instance: &str,
        state: SegmentState,
    ) -> Result<()> {
        for attempt in 1..=self.attempts() {
            let versioned = self.load_record().await?;
            let current = versioned
                .value
                .segments
                .get(segment)
                .and_then(|states| states.get(instance))
                .ok_or_else(|| {
                    Error::NotFound(format!("replica of {segment} on {instance}"))
                })?;
            if *current == state {
                return Ok(());
            }

            let mut record = versioned.value.clone();
            if let Some(replica) = record
                .segments
                .get_mut(segment)
                .and_then(|states| states.get_mut(instance))
            {
                *replica = state;
            }
            record.updated_at = util::now_seconds();

            if self
                .store
                .compare_and_put_assignment(&record, versioned.version)
                .await?
            {
                tracing::debug!(table = %self.table(), segment, instance, state = ?state, "replica state updated");
                return Ok(());
            }
            self.record_conflict(attempt);
        }

        Err(self.exhausted(None))
    }
}
