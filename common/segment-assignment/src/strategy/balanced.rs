use std::collections::{BTreeMap, BTreeSet};

use crate::balance::{self, Seed};
use crate::error::Result;
use crate::selector;
use crate::topology::PartitionGroup;
use crate::types::{InstanceId, InstanceStateMap, SegmentAssignment};

/// Spreads replicas over the whole partition group as one pool.
///
/// Used when fault-domain isolation is not required. Any replica groups in
/// the partition group are flattened in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancedStrategy {
    replication: usize,
}

impl BalancedStrategy {
    pub fn new(replication: usize) -> Self {
        Self { replication }
    }

    pub fn replication(&self) -> usize {
        self.replication
    }

    pub fn assign_segment(
        &self,
        segment: &str,
        group: &PartitionGroup,
        current: &SegmentAssignment,
    ) -> Result<Vec<InstanceId>> {
        let pool = group.pool();
        let load =
            selector::partition_load(current, group.partition, segment, pool.iter().copied());
        let instances = selector::select(pool.iter().copied(), &load, self.replication)
            .map_err(|e| e.for_segment(segment))?;

        tracing::debug!(
            segment,
            partition = group.partition,
            instances = ?instances,
            "assigned segment"
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
        let pool = group.pool();
        let eligible: BTreeSet<&str> = pool.iter().copied().collect();

        let seeds = segments
            .iter()
            .map(|(segment, states)| {
                (
                    *segment,
                    Seed::new(states, &eligible, self.replication, sticky),
                )
            })
            .collect();

        balance::place(&pool, seeds, self.replication, tolerance)
    }
}
