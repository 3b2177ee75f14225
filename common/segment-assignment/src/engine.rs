use crate::config::{RebalanceOptions, TableConfig};
use crate::error::{AssignmentError, Result};
use crate::rebalance::{self, RebalanceResult};
use crate::segment_name::SegmentName;
use crate::strategy::{self, PlacementStrategy};
use crate::topology::Topology;
use crate::types::{InstanceId, SegmentAssignment};

/// Placement engine bound to one table's configuration.
///
/// Holds no other state: every call is a pure function of the snapshots it
/// is given, so a caller that lost a write race can simply call again with
/// fresh snapshots.
#[derive(Debug, Clone)]
pub struct SegmentAssignmentEngine {
    config: TableConfig,
    strategy: PlacementStrategy,
}

impl SegmentAssignmentEngine {
    pub fn init(config: TableConfig) -> Result<Self> {
        config.validate()?;
        let strategy = strategy::lookup(&config.strategy, config.replication)?;

        tracing::info!(
            table = %config.table_name,
            strategy = strategy.name(),
            replication = config.replication,
            min_available_replicas = config.resolved_min_available_replicas(),
            max_moves_per_instance = ?config.max_moves_per_instance,
            fairness_tolerance = config.fairness_tolerance,
            "initialized segment assignment engine"
        );

        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn strategy(&self) -> &PlacementStrategy {
        &self.strategy
    }

    /// Reject topology snapshots the engine must not plan against.
    pub fn check_topology(&self, topology: &Topology) -> Result<()> {
        if topology.version < self.config.min_topology_version {
            return Err(AssignmentError::StaleTopology {
                version: topology.version,
                min_version: self.config.min_topology_version,
            });
        }
        topology.validate()
    }

    /// Instances for a newly created segment, exactly `replication` of them.
    pub fn assign_segment(
        &self,
        segment: &str,
        current: &SegmentAssignment,
        topology: &Topology,
    ) -> Result<Vec<InstanceId>> {
        self.check_topology(topology)?;

        let name = SegmentName::parse(segment)?;
        let group = topology.partition_group(name.partition()).ok_or_else(|| {
            AssignmentError::NoEligiblePartitionGroup {
                segment: segment.to_string(),
                partition: name.partition(),
            }
        })?;

        self.strategy.assign_segment(segment, group, current)
    }

    /// Target layout for the whole table plus the plan to get there.
    ///
    /// Only a stale or malformed topology fails the call. Per-segment
    /// placement failures are listed in [`RebalanceResult::unsatisfied`].
    pub fn rebalance_table(
        &self,
        current: &SegmentAssignment,
        topology: &Topology,
        options: &RebalanceOptions,
    ) -> Result<RebalanceResult> {
        self.check_topology(topology)?;
        Ok(rebalance::rebalance_table(
            &self.strategy,
            &self.config,
            current,
            topology,
            options,
        ))
    }
}
