use std::collections::{BTreeMap, BTreeSet};

use crate::balance::{self, Seed};
use crate::error::{AssignmentError, Result};
use crate::selector;
use crate::topology::{PartitionGroup, ReplicaGroup};
use crate::types::{InstanceId, InstanceStateMap, SegmentAssignment};

/// Places exactly one replica in each replica group of the partition.
///
/// Every segment of a partition draws from the same ordered set of replica
/// groups, so taking a whole group down for maintenance never removes every
/// replica of any segment. Each group is balanced on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaGroupStrategy {
    replication: usize,
}

impl ReplicaGroupStrategy {
    pub fn new(replication: usize) -> Self {
        Self { replication }
    }

    pub fn replication(&self) -> usize {
        self.replication
    }

    fn replica_groups<'g>(
        &self,
        group: &'g PartitionGroup,
        segment: &str,
    ) -> Result<&'g [ReplicaGroup]> {
        let count = group.replica_groups.len();
        if count < self.replication {
            return Err(AssignmentError::InsufficientCapacity {
                segment: segment.to_string(),
                required: self.replication,
                available: count,
            });
        }
        if count > self.replication {
            return Err(AssignmentError::InvalidTopology(format!(
                "partition {} has {count} replica groups but replication is {}",
                group.partition, self.replication
            )));
        }
        Ok(&group.replica_groups)
    }

    pub fn assign_segment(
        &self,
        segment: &str,
        group: &PartitionGroup,
        current: &SegmentAssignment,
    ) -> Result<Vec<InstanceId>> {
        let replica_groups = self.replica_groups(group, segment)?;

        let mut instances = Vec::with_capacity(replica_groups.len());
        for replica_group in replica_groups {
            let members = replica_group.instances.iter().map(String::as_str);
            let load =
                selector::partition_load(current, group.partition, segment, members.clone());
            let picked =
                selector::select(members, &load, 1).map_err(|e| e.for_segment(segment))?;
            instances.extend(picked);
        }

        tracing::debug!(
            segment,
            partition = group.partition,
            instances = ?instances,
            "assigned segment across replica groups"
        );
        Ok(instances)
    }

    pub fn rebalance_partition<'a>(
        &self,
        group: &PartitionGroup,
        segments: &[(&'a str, &'a InstanceStateMap)],
        tolerance: usize,
        sticky: bool,
    ) -> Result<BTreeMap<&'a str, Vec<InstanceId>>> {
        let replica_groups = self.replica_groups(group, "")?;

        let mut targets: BTreeMap<&'a str, Vec<InstanceId>> = segments
            .iter()
            .map(|(segment, _)| (*segment, Vec::with_capacity(replica_groups.len())))
            .collect();

        for replica_group in replica_groups {
            let pool: Vec<&str> = replica_group.instances.iter().map(String::as_str).collect();
            let eligible: BTreeSet<&str> = pool.iter().copied().collect();

            let seeds = segments
                .iter()
                .map(|(segment, states)| (*segment, Seed::new(states, &eligible, 1, sticky)))
                .collect();

            let placed = balance::place(&pool, seeds, 1, tolerance)?;
            for (segment, instances) in placed {
                if let Some(target) = targets.get_mut(segment) {
                    target.extend(instances);
                }
            }
        }

        Ok(targets)
    }
}
