mod balanced;
mod replica_group;

pub use balanced::BalancedStrategy;
pub use replica_group::ReplicaGroupStrategy;

use std::collections::BTreeMap;

use crate::error::{AssignmentError, Result};
use crate::topology::PartitionGroup;
use crate::types::{InstanceId, InstanceStateMap, SegmentAssignment};

pub const BALANCED: &str = "balanced";
pub const REPLICA_GROUP: &str = "replica-group";

type StrategyFactory = fn(usize) -> PlacementStrategy;

/// Strategies selectable from table config, keyed by name.
const REGISTRY: &[(&str, StrategyFactory)] = &[
    (BALANCED, balanced_factory),
    (REPLICA_GROUP, replica_group_factory),
];

fn balanced_factory(replication: usize) -> PlacementStrategy {
    PlacementStrategy::Balanced(BalancedStrategy::new(replication))
}

fn replica_group_factory(replication: usize) -> PlacementStrategy {
    PlacementStrategy::ReplicaGroup(ReplicaGroupStrategy::new(replication))
}

/// Build the strategy registered under `name`.
pub fn lookup(name: &str, replication: usize) -> Result<PlacementStrategy> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, factory)| factory(replication))
        .ok_or_else(|| {
            AssignmentError::InvalidConfig(format!(
                "unknown strategy '{name}', expected one of: {}",
                registered_names().collect::<Vec<_>>().join(", ")
            ))
        })
}

pub fn registered_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// How a table's segments are spread over the instances of a partition group.
///
/// Both variants share the same two operations: place one new segment, and
/// recompute the layout of every segment of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// One flat pool per partition, replicas go to the least-loaded instances.
    Balanced(BalancedStrategy),
    /// Exactly one replica per replica group, so a whole group can go down
    /// without losing every copy of any segment.
    ReplicaGroup(ReplicaGroupStrategy),
}

impl PlacementStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            PlacementStrategy::Balanced(_) => BALANCED,
            PlacementStrategy::ReplicaGroup(_) => REPLICA_GROUP,
        }
    }

    pub fn replication(&self) -> usize {
        match self {
            PlacementStrategy::Balanced(s) => s.replication(),
            PlacementStrategy::ReplicaGroup(s) => s.replication(),
        }
    }

    /// Instances for a new segment, exactly `replication` of them.
    ///
    /// Any entry for `segment` already present in `current` is ignored when
    /// computing load, so retrying the same call yields the same answer.
    pub fn assign_segment(
        &self,
        segment: &str,
        group: &PartitionGroup,
        current: &SegmentAssignment,
    ) -> Result<Vec<InstanceId>> {
        match self {
            PlacementStrategy::Balanced(s) => s.assign_segment(segment, group, current),
            PlacementStrategy::ReplicaGroup(s) => s.assign_segment(segment, group, current),
        }
    }

    /// Target instances for every segment of one partition.
    ///
    /// With `sticky` set, current replicas that are still eligible are kept
    /// unless balance requires moving them. Without it the partition is laid
    /// out from scratch.
    pub fn rebalance_partition<'a>(
        &self,
        group: &PartitionGroup,
        segments: &[(&'a str, &'a InstanceStateMap)],
        tolerance: usize,
        sticky: bool,
    ) -> Result<BTreeMap<&'a str, Vec<InstanceId>>> {
        match self {
            PlacementStrategy::Balanced(s) => {
                s.rebalance_partition(group, segments, tolerance, sticky)
            }
            PlacementStrategy::ReplicaGroup(s) => {
                s.rebalance_partition(group, segments, tolerance, sticky)
            }
        }
    }
}
