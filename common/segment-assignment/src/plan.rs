use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{InstanceId, InstanceStateMap, SegmentAssignment, SegmentState};

/// One atomic change to a table's assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransitionOp {
    /// Place a new replica. It enters as OFFLINE and is expected to converge
    /// to `state` once the instance has loaded the data.
    Add {
        segment: String,
        instance: InstanceId,
        state: SegmentState,
    },
    Remove {
        segment: String,
        instance: InstanceId,
    },
}

impl TransitionOp {
    pub fn segment(&self) -> &str {
        match self {
            TransitionOp::Add { segment, .. } | TransitionOp::Remove { segment, .. } => segment,
        }
    }

    pub fn instance(&self) -> &str {
        match self {
            TransitionOp::Add { instance, .. } | TransitionOp::Remove { instance, .. } => instance,
        }
    }
}

/// Apply operations in order to an assignment.
pub fn apply(assignment: &mut SegmentAssignment, ops: &[TransitionOp]) {
    for op in ops {
        match op {
            TransitionOp::Add {
                segment, instance, ..
            } => {
                assignment
                    .entry(segment.clone())
                    .or_default()
                    .insert(instance.clone(), SegmentState::Offline);
            }
            TransitionOp::Remove { segment, instance } => {
                if let Some(states) = assignment.get_mut(segment) {
                    states.remove(instance);
                    if states.is_empty() {
                        assignment.remove(segment);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSettings {
    /// Serving replicas every segment keeps while it is being moved.
    pub min_available_replicas: usize,
    pub max_moves_per_instance: Option<usize>,
    /// Drop availability sequencing altogether.
    pub downtime: bool,
}

/// Operations grouped into waves.
///
/// Waves are applied in order, and the caller lets every replica added by
/// one wave reach a serving state before applying the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    waves: Vec<Vec<TransitionOp>>,
    awaiting_convergence: bool,
}

impl TransitionPlan {
    pub fn waves(&self) -> &[Vec<TransitionOp>] {
        &self.waves
    }

    pub fn first_wave(&self) -> Option<&[TransitionOp]> {
        self.waves.first().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Total number of operations across all waves.
    pub fn len(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// True when replicas the target keeps are still OFFLINE in the current
    /// assignment, so applying the first wave must wait for them to serve.
    pub fn awaiting_convergence(&self) -> bool {
        self.awaiting_convergence
    }
}

static NO_REPLICAS: InstanceStateMap = BTreeMap::new();

struct SegmentMoves<'a> {
    segment: &'a str,
    adds: VecDeque<(&'a str, SegmentState)>,
    /// (instance, serving), non-serving replicas first.
    removes: VecDeque<(&'a str, bool)>,
    available: usize,
    maturing: usize,
    floor: usize,
}

impl<'a> SegmentMoves<'a> {
    fn new(
        segment: &'a str,
        current: Option<&'a InstanceStateMap>,
        target: Option<&'a InstanceStateMap>,
        min_available: usize,
    ) -> Self {
        let current_states = current.unwrap_or(&NO_REPLICAS);
        let target_states = target.unwrap_or(&NO_REPLICAS);

        let adds = target_states
            .iter()
            .filter(|(instance, _)| !current_states.contains_key(*instance))
            .map(|(instance, state)| (instance.as_str(), *state))
            .collect();

        let mut removes: Vec<(&'a str, bool)> = current_states
            .iter()
            .filter(|(instance, _)| !target_states.contains_key(*instance))
            .map(|(instance, state)| (instance.as_str(), state.is_serving()))
            .collect();
        removes.sort_by_key(|(instance, serving)| (*serving, *instance));

        let available = current_states.values().filter(|s| s.is_serving()).count();
        let maturing = current_states
            .iter()
            .filter(|(instance, state)| {
                target_states.contains_key(*instance)
                    && !state.is_serving()
                    && **state != SegmentState::Error
            })
            .count();

        Self {
            segment,
            adds,
            removes: removes.into(),
            available,
            maturing,
            floor: min_available.min(target_states.len()),
        }
    }

    fn is_done(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    fn add_op(&self, instance: &str, state: SegmentState) -> TransitionOp {
        TransitionOp::Add {
            segment: self.segment.to_string(),
            instance: instance.to_string(),
            state,
        }
    }

    fn remove_op(&self, instance: &str) -> TransitionOp {
        TransitionOp::Remove {
            segment: self.segment.to_string(),
            instance: instance.to_string(),
        }
    }
}

/// Per-instance operation counter for one wave.
struct WaveBudget<'a> {
    cap: Option<usize>,
    used: BTreeMap<&'a str, usize>,
}

impl<'a> WaveBudget<'a> {
    fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            used: BTreeMap::new(),
        }
    }

    fn try_take(&mut self, instance: &'a str) -> bool {
        let used = self.used.entry(instance).or_default();
        match self.cap {
            Some(cap) if *used >= cap => false,
            _ => {
                *used += 1;
                true
            }
        }
    }
}

/// Sequence the difference between `current` and `target` into waves.
///
/// Within a segment every addition is emitted before any removal. A serving
/// replica is removed only while the segment keeps at least
/// `min(min_available_replicas, target size)` available replicas, where
/// replicas added or left OFFLINE by an earlier wave count as available.
/// Non-serving replicas can always go.
pub fn build(
    current: &SegmentAssignment,
    target: &SegmentAssignment,
    settings: &PlanSettings,
) -> TransitionPlan {
    let segments: BTreeSet<&str> = current
        .keys()
        .chain(target.keys())
        .map(String::as_str)
        .collect();

    let mut pending: Vec<SegmentMoves> = segments
        .into_iter()
        .map(|segment| {
            SegmentMoves::new(
                segment,
                current.get(segment),
                target.get(segment),
                settings.min_available_replicas,
            )
        })
        .collect();

    let awaiting_convergence = pending.iter().any(|moves| moves.maturing > 0);
    pending.retain(|moves| !moves.is_done());

    let waves = if settings.downtime {
        downtime_waves(&pending)
    } else {
        sequenced_waves(pending, settings.max_moves_per_instance)
    };

    TransitionPlan {
        waves,
        awaiting_convergence,
    }
}

fn downtime_waves(pending: &[SegmentMoves]) -> Vec<Vec<TransitionOp>> {
    if pending.is_empty() {
        return Vec::new();
    }
    let adds = pending.iter().flat_map(|moves| {
        moves
            .adds
            .iter()
            .map(|(instance, state)| moves.add_op(instance, *state))
    });
    let removes = pending.iter().flat_map(|moves| {
        moves
            .removes
            .iter()
            .map(|(instance, _)| moves.remove_op(instance))
    });
    vec![adds.chain(removes).collect()]
}

fn sequenced_waves(
    mut pending: Vec<SegmentMoves>,
    max_moves_per_instance: Option<usize>,
) -> Vec<Vec<TransitionOp>> {
    let mut waves = Vec::new();

    while !pending.is_empty() {
        let mut budget = WaveBudget::new(max_moves_per_instance);
        let mut wave = Vec::new();

        for moves in pending.iter_mut() {
            while let Some(&(instance, state)) = moves.adds.front() {
                if !budget.try_take(instance) {
                    break;
                }
                wave.push(moves.add_op(instance, state));
                moves.adds.pop_front();
                moves.maturing += 1;
            }
            if !moves.adds.is_empty() {
                continue;
            }

            while let Some(&(instance, serving)) = moves.removes.front() {
                if serving && moves.available <= moves.floor {
                    break;
                }
                if !budget.try_take(instance) {
                    break;
                }
                wave.push(moves.remove_op(instance));
                moves.removes.pop_front();
                if serving {
                    moves.available -= 1;
                }
            }
        }

        let mut matured = 0;
        for moves in pending.iter_mut() {
            matured += moves.maturing;
            moves.available += moves.maturing;
            moves.maturing = 0;
        }
        pending.retain(|moves| !moves.is_done());

        if wave.is_empty() {
            if matured == 0 {
                tracing::warn!(
                    segments = pending.len(),
                    "transition plan cannot make progress without dropping below minimum available replicas"
                );
                break;
            }
            continue;
        }
        waves.push(wave);
    }

    waves
}
