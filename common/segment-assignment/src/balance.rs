use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AssignmentError, Result};
use crate::selector::{self, InstanceLoad};
use crate::types::{InstanceId, InstanceStateMap, SegmentState};

/// Current replicas of a segment that may stay where they are.
///
/// Keeps replicas on eligible instances that are not in ERROR, at most
/// `limit` of them, serving replicas first and then by instance id.
pub(crate) fn retained(
    states: &InstanceStateMap,
    eligible: &BTreeSet<&str>,
    limit: usize,
) -> Vec<InstanceId> {
    let mut candidates: Vec<(&InstanceId, SegmentState)> = states
        .iter()
        .filter(|(instance, state)| {
            **state != SegmentState::Error && eligible.contains(instance.as_str())
        })
        .map(|(instance, state)| (instance, *state))
        .collect();
    candidates.sort_by_key(|(instance, state)| (!state.is_serving(), *instance));
    candidates
        .into_iter()
        .take(limit)
        .map(|(instance, _)| instance.clone())
        .collect()
}

/// Starting point of one segment before placement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Seed {
    /// Replicas that stay unless balance moves them.
    pub kept: Vec<InstanceId>,
    /// Instances holding a failed replica, used only when nothing else fits.
    pub avoid: Vec<InstanceId>,
}

impl Seed {
    pub(crate) fn new(
        states: &InstanceStateMap,
        eligible: &BTreeSet<&str>,
        limit: usize,
        sticky: bool,
    ) -> Self {
        Self {
            kept: if sticky {
                retained(states, eligible, limit)
            } else {
                Vec::new()
            },
            avoid: states
                .iter()
                .filter(|(_, state)| **state == SegmentState::Error)
                .map(|(instance, _)| instance.clone())
                .collect(),
        }
    }

    fn avoids(&self, instance: &str) -> bool {
        self.avoid.iter().any(|a| a == instance)
    }
}

/// Sticky, balanced placement of `replicas` replicas per segment over `pool`.
///
/// 1. Keep the seeded replicas and count them as load.
/// 2. Fill every missing slot with the least-loaded instances, segments in
///    name order, staying off avoided instances while others are left.
/// 3. While some pair of instances is further apart than `tolerance`, move
///    a replica from the heavier to the lighter one. Pairs are tried
///    heaviest first against lightest first, so an instance every segment
///    avoids does not stop the others from evening out.
///
/// Fails only when the pool has fewer distinct instances than `replicas`.
pub(crate) fn place<'a>(
    pool: &[&str],
    seeds: BTreeMap<&'a str, Seed>,
    replicas: usize,
    tolerance: usize,
) -> Result<BTreeMap<&'a str, Vec<InstanceId>>> {
    let eligible: BTreeSet<&str> = pool.iter().copied().collect();
    if eligible.len() < replicas {
        return Err(AssignmentError::InsufficientCapacity {
            segment: String::new(),
            required: replicas,
            available: eligible.len(),
        });
    }

    let mut load: InstanceLoad = eligible.iter().map(|i| (i.to_string(), 0)).collect();
    for seed in seeds.values() {
        for instance in &seed.kept {
            *load.entry(instance.clone()).or_default() += 1;
        }
    }

    let mut placements: BTreeMap<&'a str, (Vec<InstanceId>, Seed)> = BTreeMap::new();
    for (segment, mut seed) in seeds {
        let mut instances = std::mem::take(&mut seed.kept);
        let missing = replicas.saturating_sub(instances.len());
        if missing > 0 {
            let (preferred, fallback): (Vec<&str>, Vec<&str>) = eligible
                .iter()
                .copied()
                .filter(|i| !instances.iter().any(|k| k.as_str() == *i))
                .partition(|i| !seed.avoids(i));
            let take = missing.min(preferred.len());
            let mut chosen = selector::select(preferred, &load, take)
                .map_err(|e| e.for_segment(segment))?;
            chosen.extend(
                selector::select(fallback, &load, missing - take)
                    .map_err(|e| e.for_segment(segment))?,
            );
            for instance in &chosen {
                *load.entry(instance.clone()).or_default() += 1;
            }
            tracing::debug!(segment, chosen = ?chosen, "filled missing replicas");
            instances.extend(chosen);
        }
        placements.insert(segment, (instances, seed));
    }

    let tolerance = tolerance.max(1);
    while let Some((segment, from, to)) = next_move(&load, &placements, tolerance) {
        if let Some((instances, _)) = placements.get_mut(segment) {
            for slot in instances.iter_mut().filter(|slot| **slot == from) {
                *slot = to.clone();
            }
        }
        tracing::debug!(
            segment,
            from = %from,
            to = %to,
            "moving replica to restore balance"
        );
        *load.entry(from).or_default() -= 1;
        *load.entry(to).or_default() += 1;
    }

    Ok(placements
        .into_iter()
        .map(|(segment, (instances, _))| (segment, instances))
        .collect())
}

/// Next replica to move: the highest-named segment on the heaviest instance
/// that can hand one to the lightest instance still more than `tolerance`
/// below it. A segment never moves onto an instance it already holds or
/// avoids.
fn next_move<'a>(
    load: &InstanceLoad,
    placements: &BTreeMap<&'a str, (Vec<InstanceId>, Seed)>,
    tolerance: usize,
) -> Option<(&'a str, InstanceId, InstanceId)> {
    let mut lightest: Vec<(usize, &InstanceId)> = load.iter().map(|(i, c)| (*c, i)).collect();
    lightest.sort_unstable();
    let mut heaviest = lightest.clone();
    heaviest.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    for (max, heavy) in &heaviest {
        for (min, light) in &lightest {
            if *max <= min + tolerance {
                break;
            }
            let victim = placements.iter().rev().find(|(_, (instances, seed))| {
                instances.contains(*heavy)
                    && !instances.contains(*light)
                    && !seed.avoids(light)
            });
            if let Some((segment, _)) = victim {
                return Some((*segment, (*heavy).clone(), (*light).clone()));
            }
        }
    }
    None
}
