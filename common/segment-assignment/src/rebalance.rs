use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{RebalanceOptions, TableConfig};
use crate::error::AssignmentError;
use crate::plan::{self, PlanSettings, TransitionPlan};
use crate::segment_name::SegmentName;
use crate::strategy::PlacementStrategy;
use crate::topology::Topology;
use crate::types::{self, InstanceStateMap, SegmentAssignment};

/// A segment the rebalance could not place, left at its current placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsatisfiedSegment {
    pub segment: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: AssignmentError,
}

fn serialize_error<S: serde::Serializer>(
    error: &AssignmentError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceResult {
    /// Converged layout for every segment of the table. Every replica is in
    /// the state its segment should end up serving in.
    pub target: SegmentAssignment,
    pub plan: TransitionPlan,
    pub unsatisfied: Vec<UnsatisfiedSegment>,
}

impl RebalanceResult {
    /// Current layout already matches the target and every kept replica is
    /// serving.
    pub fn is_converged(&self) -> bool {
        self.plan.is_empty() && !self.plan.awaiting_convergence()
    }
}

/// Recompute the target layout of a whole table and the plan to reach it.
///
/// Partitions are planned independently. A partition that cannot be placed
/// reports each of its segments as unsatisfied and keeps them where they are;
/// the rest of the table is planned normally.
pub(crate) fn rebalance_table(
    strategy: &PlacementStrategy,
    config: &TableConfig,
    current: &SegmentAssignment,
    topology: &Topology,
    options: &RebalanceOptions,
) -> RebalanceResult {
    let mut target = SegmentAssignment::new();
    let mut unsatisfied = Vec::new();
    let mut by_partition: BTreeMap<u32, Vec<(&str, &InstanceStateMap)>> = BTreeMap::new();

    for (segment, states) in current {
        if !options.include_consuming && types::is_consuming(states) {
            target.insert(segment.clone(), states.clone());
            continue;
        }
        match SegmentName::parse(segment) {
            Ok(name) => by_partition
                .entry(name.partition())
                .or_default()
                .push((name.as_str(), states)),
            Err(error) => {
                unsatisfied.push(UnsatisfiedSegment {
                    segment: segment.clone(),
                    error,
                });
                target.insert(segment.clone(), states.clone());
            }
        }
    }

    let sticky = !options.bootstrap;
    for (partition, segments) in by_partition {
        let placed = match topology.partition_group(partition) {
            Some(group) => {
                strategy.rebalance_partition(group, &segments, config.fairness_tolerance, sticky)
            }
            None => Err(AssignmentError::NoEligiblePartitionGroup {
                segment: String::new(),
                partition,
            }),
        };

        match placed {
            Ok(placed) => {
                for (segment, instances) in placed {
                    let state = current
                        .get(segment)
                        .map(types::target_state)
                        .unwrap_or(types::SegmentState::Online);
                    target.insert(
                        segment.to_string(),
                        instances.into_iter().map(|i| (i, state)).collect(),
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    table = %config.table_name,
                    partition,
                    segments = segments.len(),
                    error = %error,
                    "partition cannot be rebalanced, keeping current placement"
                );
                for (segment, states) in segments {
                    unsatisfied.push(UnsatisfiedSegment {
                        segment: segment.to_string(),
                        error: error.clone().for_segment(segment),
                    });
                    target.insert(segment.to_string(), states.clone());
                }
            }
        }
    }

    let settings = PlanSettings {
        min_available_replicas: if options.downtime {
            0
        } else {
            config.resolved_min_available_replicas()
        },
        max_moves_per_instance: config.max_moves_per_instance,
        downtime: options.downtime,
    };
    let plan = plan::build(current, &target, &settings);

    tracing::info!(
        table = %config.table_name,
        topology_version = topology.version,
        segments = current.len(),
        operations = plan.len(),
        waves = plan.waves().len(),
        unsatisfied = unsatisfied.len(),
        bootstrap = options.bootstrap,
        "computed rebalance"
    );

    RebalanceResult {
        target,
        plan,
        unsatisfied,
    }
}
