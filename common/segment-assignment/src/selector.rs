use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AssignmentError, Result};
use crate::segment_name::SegmentName;
use crate::types::{InstanceId, InstanceStateMap, SegmentAssignment, SegmentState};

/// Segment count per instance.
pub type InstanceLoad = BTreeMap<InstanceId, usize>;

/// Pick the `k` least-loaded candidates.
///
/// Candidates are ranked by ascending load, ties broken by instance id, so
/// identical inputs always produce the identical ordered result. Instances
/// missing from `load` count as empty. Duplicate candidates are considered
/// once.
pub fn select<'a, I>(candidates: I, load: &InstanceLoad, k: usize) -> Result<Vec<InstanceId>>
where
    I: IntoIterator<Item = &'a str>,
{
    let unique: BTreeSet<&str> = candidates.into_iter().collect();
    if k > unique.len() {
        return Err(AssignmentError::InsufficientCapacity {
            segment: String::new(),
            required: k,
            available: unique.len(),
        });
    }

    let mut ranked: Vec<(usize, &str)> = unique
        .into_iter()
        .map(|id| (load.get(id).copied().unwrap_or(0), id))
        .collect();
    ranked.sort_unstable();

    Ok(ranked
        .into_iter()
        .take(k)
        .map(|(_, id)| id.to_string())
        .collect())
}

/// Count segments per pool instance.
///
/// Every pool instance appears in the result, with 0 when it holds nothing.
/// Replicas on instances outside the pool are ignored, as are replicas in
/// ERROR since a rebalance never keeps them.
pub fn instance_load<'a, 'b, S, P>(segments: S, pool: P) -> InstanceLoad
where
    S: IntoIterator<Item = &'a InstanceStateMap>,
    P: IntoIterator<Item = &'b str>,
{
    let mut load: InstanceLoad = pool.into_iter().map(|i| (i.to_string(), 0)).collect();
    for states in segments {
        for (instance, state) in states {
            if *state == SegmentState::Error {
                continue;
            }
            if let Some(count) = load.get_mut(instance) {
                *count += 1;
            }
        }
    }
    load
}

/// Load of the pool counted over the segments of one partition only, leaving
/// `exclude` out.
///
/// Matches the load a rebalance of that partition sees, so a freshly
/// assigned segment is already where the next rebalance would put it.
pub fn partition_load<'a, P>(
    current: &SegmentAssignment,
    partition: u32,
    exclude: &str,
    pool: P,
) -> InstanceLoad
where
    P: IntoIterator<Item = &'a str>,
{
    instance_load(
        current
            .iter()
            .filter(|(name, _)| name.as_str() != exclude)
            .filter(|(name, _)| {
                SegmentName::parse(name).is_ok_and(|n| n.partition() == partition)
            })
            .map(|(_, states)| states),
        pool,
    )
}
