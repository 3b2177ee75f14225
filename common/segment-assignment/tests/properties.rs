use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use segment_assignment::plan;
use segment_assignment::strategy;
use segment_assignment::{
    InstanceStateMap, PartitionGroup, RebalanceOptions, SegmentAssignment,
    SegmentAssignmentEngine, SegmentState, TableConfig, Topology,
};

const SEEDS: u64 = 64;

struct Scenario {
    config: TableConfig,
    topology: Topology,
    current: SegmentAssignment,
}

fn random_states(rng: &mut StdRng, instances: &[String], allow_error: bool) -> InstanceStateMap {
    let mut states = InstanceStateMap::new();
    let replicas = rng.gen_range(1..=instances.len().min(4));
    while states.len() < replicas {
        let instance = &instances[rng.gen_range(0..instances.len())];
        let state = match rng.gen_range(0..10) {
            0 if allow_error => SegmentState::Error,
            1 | 2 => SegmentState::Offline,
            _ => SegmentState::Online,
        };
        states.insert(instance.clone(), state);
    }
    states
}

/// A table whose current layout is scattered over a superset of the live
/// instances, so every rebalance has removals, additions and moves to plan.
fn balanced_scenario(seed: u64, allow_error: bool) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let partitions = rng.gen_range(1..=3u32);
    let pool_size = rng.gen_range(3..=7);
    let replication = rng.gen_range(1..=3usize.min(pool_size));

    let mut config = TableConfig::new("events", replication);
    config.min_available_replicas = rng.gen_range(-1..=2);
    if rng.gen_bool(0.5) {
        config.max_moves_per_instance = Some(rng.gen_range(1..=3));
    }

    let mut topology = Topology::new("events", 1);
    let mut current = SegmentAssignment::new();
    for partition in 0..partitions {
        let live: Vec<String> = (0..pool_size)
            .map(|i| format!("server-{partition}-{i}"))
            .collect();
        let names: Vec<&str> = live.iter().map(String::as_str).collect();
        topology = topology.with_partition_group(PartitionGroup::flat(partition, &names));

        let mut known = live.clone();
        known.push(format!("retired-{partition}"));
        for sequence in 0..rng.gen_range(0..20) {
            current.insert(
                format!("events__{partition}__{sequence}__20240101T0000Z"),
                random_states(&mut rng, &known, allow_error),
            );
        }
    }

    Scenario {
        config,
        topology,
        current,
    }
}

/// Several partitions drawing on one shared set of servers, each already
/// holding a converged layout.
fn shared_pool_scenario(seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let partitions = rng.gen_range(2..=4u32);
    let pool_size = rng.gen_range(2..=5);
    let replication = rng.gen_range(1..=2usize.min(pool_size));

    let servers: Vec<String> = (0..pool_size).map(|i| format!("server-{i}")).collect();
    let names: Vec<&str> = servers.iter().map(String::as_str).collect();
    let mut topology = Topology::new("events", 1);
    let mut current = SegmentAssignment::new();
    for partition in 0..partitions {
        topology = topology.with_partition_group(PartitionGroup::flat(partition, &names));
        for sequence in 0..rng.gen_range(0..12) {
            current.insert(
                format!("events__{partition}__{sequence}__20240101T0000Z"),
                random_states(&mut rng, &servers, false),
            );
        }
    }

    let config = TableConfig::new("events", replication);
    let engine = SegmentAssignmentEngine::init(config.clone()).unwrap();
    let current = engine
        .rebalance_table(&current, &topology, &RebalanceOptions::default())
        .unwrap()
        .target;

    Scenario {
        config,
        topology,
        current,
    }
}

fn replica_group_scenario(seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let replication = rng.gen_range(1..=3usize);
    let per_group = rng.gen_range(1..=4);

    let groups: Vec<Vec<String>> = (0..replication)
        .map(|g| (0..per_group).map(|i| format!("g{g}-{i}")).collect())
        .collect();
    let group_refs: Vec<Vec<&str>> = groups
        .iter()
        .map(|g| g.iter().map(String::as_str).collect())
        .collect();
    let slices: Vec<&[&str]> = group_refs.iter().map(Vec::as_slice).collect();
    let topology = Topology::new("events", 1)
        .with_partition_group(PartitionGroup::with_replica_groups(0, &slices));

    let known: Vec<String> = groups.iter().flatten().cloned().collect();
    let mut current = SegmentAssignment::new();
    for sequence in 0..rng.gen_range(1..15) {
        current.insert(
            format!("events__0__{sequence}__20240101T0000Z"),
            random_states(&mut rng, &known, false),
        );
    }

    Scenario {
        config: TableConfig::new("events", replication).with_strategy(strategy::REPLICA_GROUP),
        topology,
        current,
    }
}

fn converge(assignment: &mut SegmentAssignment) {
    for states in assignment.values_mut() {
        for state in states.values_mut() {
            if *state == SegmentState::Offline {
                *state = SegmentState::Online;
            }
        }
    }
}

fn serving(states: Option<&InstanceStateMap>) -> usize {
    states.map_or(0, |s| s.values().filter(|s| s.is_serving()).count())
}

/// Instances each segment had a failed replica on.
fn failed_on(assignment: &SegmentAssignment) -> BTreeMap<&str, BTreeSet<&str>> {
    assignment
        .iter()
        .map(|(segment, states)| {
            (
                segment.as_str(),
                states
                    .iter()
                    .filter(|(_, state)| **state == SegmentState::Error)
                    .map(|(instance, _)| instance.as_str())
                    .collect(),
            )
        })
        .collect()
}

fn instance_sets(assignment: &SegmentAssignment) -> BTreeMap<&str, BTreeSet<&str>> {
    assignment
        .iter()
        .map(|(segment, states)| {
            (
                segment.as_str(),
                states.keys().map(String::as_str).collect(),
            )
        })
        .collect()
}

#[test]
fn every_segment_gets_replication_distinct_instances() {
    for seed in 0..SEEDS {
        let scenario = balanced_scenario(seed, true);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let result = engine
            .rebalance_table(&scenario.current, &scenario.topology, &RebalanceOptions::default())
            .unwrap();

        assert!(result.unsatisfied.is_empty(), "seed {seed}");
        assert_eq!(result.target.len(), scenario.current.len(), "seed {seed}");
        for (segment, states) in &result.target {
            assert_eq!(states.len(), scenario.config.replication, "seed {seed} {segment}");
            assert!(
                states.values().all(|s| *s == SegmentState::Online),
                "seed {seed} {segment}"
            );
        }
    }
}

#[test]
fn load_spread_within_each_partition_is_at_most_one() {
    for seed in 0..SEEDS {
        let scenario = balanced_scenario(seed, true);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let result = engine
            .rebalance_table(&scenario.current, &scenario.topology, &RebalanceOptions::default())
            .unwrap();
        let failed = failed_on(&scenario.current);

        for group in &scenario.topology.partition_groups {
            let prefix = format!("events__{}__", group.partition);
            let segments: Vec<(&str, &InstanceStateMap)> = result
                .target
                .iter()
                .filter(|(s, _)| s.starts_with(&prefix))
                .map(|(s, states)| (s.as_str(), states))
                .collect();
            if segments.is_empty() {
                continue;
            }
            let mut load: BTreeMap<&str, usize> =
                group.pool().into_iter().map(|i| (i, 0)).collect();
            for (_, states) in &segments {
                for instance in states.keys() {
                    if let Some(count) = load.get_mut(instance.as_str()) {
                        *count += 1;
                    }
                }
            }

            // Instances a segment failed on may stay light, but no segment
            // can still move from a heavy instance to one two lighter.
            for (heavy, max) in &load {
                for (light, min) in &load {
                    if *max <= min + 1 {
                        continue;
                    }
                    let movable = segments.iter().find(|(segment, states)| {
                        states.contains_key(*heavy)
                            && !states.contains_key(*light)
                            && !failed[segment].contains(light)
                    });
                    assert!(
                        movable.is_none(),
                        "seed {seed} partition {}: {movable:?} could move {heavy} -> {light} in {load:?}",
                        group.partition
                    );
                }
            }

            if segments.iter().all(|(segment, _)| failed[segment].is_empty()) {
                let max = load.values().max().copied().unwrap_or(0);
                let min = load.values().min().copied().unwrap_or(0);
                assert!(max - min <= 1, "seed {seed} partition {}: {load:?}", group.partition);
            }
        }
    }
}

#[test]
fn assignment_is_deterministic() {
    for seed in 0..SEEDS {
        let scenario = balanced_scenario(seed, true);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let first = engine.assign_segment(
            "events__0__999__20240102T0000Z",
            &scenario.current,
            &scenario.topology,
        );
        let second = engine.assign_segment(
            "events__0__999__20240102T0000Z",
            &scenario.current,
            &scenario.topology,
        );
        assert_eq!(first, second, "seed {seed}");

        let instances = first.unwrap();
        let unique: BTreeSet<&String> = instances.iter().collect();
        assert_eq!(unique.len(), scenario.config.replication, "seed {seed}");

        let options = RebalanceOptions::default();
        assert_eq!(
            engine
                .rebalance_table(&scenario.current, &scenario.topology, &options)
                .unwrap(),
            engine
                .rebalance_table(&scenario.current, &scenario.topology, &options)
                .unwrap(),
            "seed {seed}"
        );
    }
}

#[test]
fn rebalancing_the_target_is_a_fixed_point() {
    for seed in 0..SEEDS {
        let scenario = balanced_scenario(seed, false);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let options = RebalanceOptions::default();
        let first = engine
            .rebalance_table(&scenario.current, &scenario.topology, &options)
            .unwrap();
        let second = engine
            .rebalance_table(&first.target, &scenario.topology, &options)
            .unwrap();

        assert_eq!(second.target, first.target, "seed {seed}");
        assert!(second.is_converged(), "seed {seed}");
    }
}

#[test]
fn failed_replicas_settle_after_one_more_rebalance() {
    for seed in 0..SEEDS {
        let scenario = balanced_scenario(seed, true);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let options = RebalanceOptions::default();
        let first = engine
            .rebalance_table(&scenario.current, &scenario.topology, &options)
            .unwrap();
        let had_failures = failed_on(&scenario.current).values().any(|f| !f.is_empty());

        // The target drops every failed replica, so at most one further
        // rebalance spreads load onto the instances that were avoided.
        let second = engine
            .rebalance_table(&first.target, &scenario.topology, &options)
            .unwrap();
        if !had_failures {
            assert_eq!(second.target, first.target, "seed {seed}");
        }
        let third = engine
            .rebalance_table(&second.target, &scenario.topology, &options)
            .unwrap();
        assert_eq!(third.target, second.target, "seed {seed}");
        assert!(third.is_converged(), "seed {seed}");
    }
}

#[test]
fn new_segment_on_shared_servers_is_not_moved_by_rebalance() {
    for seed in 0..SEEDS {
        let scenario = shared_pool_scenario(seed);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let options = RebalanceOptions::default();

        for group in &scenario.topology.partition_groups {
            let segment = format!("events__{}__999__20240102T0000Z", group.partition);
            let instances = engine
                .assign_segment(&segment, &scenario.current, &scenario.topology)
                .unwrap();

            let mut current = scenario.current.clone();
            current.insert(
                segment.clone(),
                instances
                    .iter()
                    .map(|i| (i.clone(), SegmentState::Online))
                    .collect(),
            );
            let result = engine
                .rebalance_table(&current, &scenario.topology, &options)
                .unwrap();

            assert!(
                result.is_converged(),
                "seed {seed} {segment} on {instances:?}: {:?}",
                result.plan
            );
            assert_eq!(result.target, current, "seed {seed} {segment}");
        }
    }
}

#[test]
fn applying_the_plan_never_drops_below_min_available() {
    for seed in 0..SEEDS {
        let scenario = balanced_scenario(seed, false);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let result = engine
            .rebalance_table(&scenario.current, &scenario.topology, &RebalanceOptions::default())
            .unwrap();
        let min_available = scenario.config.resolved_min_available_replicas();

        let floors: BTreeMap<&str, usize> = scenario
            .current
            .iter()
            .map(|(segment, states)| {
                let target_size = result.target.get(segment).map_or(0, |t| t.len());
                let floor = min_available.min(target_size).min(serving(Some(states)));
                (segment.as_str(), floor)
            })
            .collect();

        let mut applied = scenario.current.clone();
        for (wave_index, wave) in result.plan.waves().iter().enumerate() {
            if wave_index > 0 {
                converge(&mut applied);
            }
            for op in wave {
                plan::apply(&mut applied, std::slice::from_ref(op));
                let floor = floors.get(op.segment()).copied().unwrap_or(0);
                assert!(
                    serving(applied.get(op.segment())) >= floor,
                    "seed {seed} wave {wave_index}: {op:?}"
                );
            }
        }

        converge(&mut applied);
        assert_eq!(
            instance_sets(&applied),
            instance_sets(&result.target),
            "seed {seed}"
        );
    }
}

#[test]
fn replica_group_segments_take_one_instance_per_group() {
    for seed in 0..SEEDS {
        let scenario = replica_group_scenario(seed);
        let engine = SegmentAssignmentEngine::init(scenario.config.clone()).unwrap();
        let result = engine
            .rebalance_table(&scenario.current, &scenario.topology, &RebalanceOptions::default())
            .unwrap();
        assert!(result.unsatisfied.is_empty(), "seed {seed}");

        let group = &scenario.topology.partition_groups[0];
        for (segment, states) in &result.target {
            for replica_group in &group.replica_groups {
                let hits = replica_group
                    .instances
                    .iter()
                    .filter(|i| states.contains_key(*i))
                    .count();
                assert_eq!(hits, 1, "seed {seed} {segment} group {}", replica_group.id);
            }
        }

        for replica_group in &group.replica_groups {
            let mut load: BTreeMap<&str, usize> = replica_group
                .instances
                .iter()
                .map(|i| (i.as_str(), 0))
                .collect();
            for states in result.target.values() {
                for instance in states.keys() {
                    if let Some(count) = load.get_mut(instance.as_str()) {
                        *count += 1;
                    }
                }
            }
            let max = load.values().max().copied().unwrap_or(0);
            let min = load.values().min().copied().unwrap_or(0);
            assert!(max - min <= 1, "seed {seed} group {}: {load:?}", replica_group.id);
        }
    }
}

#[test]
fn example_open_slot_goes_to_empty_instance() {
    let engine = SegmentAssignmentEngine::init(TableConfig::new("events", 3)).unwrap();
    let topology = Topology::new("events", 1)
        .with_partition_group(PartitionGroup::flat(0, &["A", "B", "C", "D"]));
    fn online(instances: &[&str]) -> InstanceStateMap {
        instances
            .iter()
            .map(|i| (i.to_string(), SegmentState::Online))
            .collect()
    }
    let current: SegmentAssignment = [
        ("seg1".to_string(), online(&["A", "B"])),
        ("seg2".to_string(), online(&["B", "C"])),
        ("seg3".to_string(), online(&["C", "A"])),
    ]
    .into();

    assert_eq!(
        engine.assign_segment("seg5", &current, &topology).unwrap(),
        vec!["D", "A", "B"]
    );
}
