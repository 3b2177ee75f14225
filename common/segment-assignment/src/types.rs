use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type InstanceId = String;

/// Replica states of one segment, keyed by instance id.
pub type InstanceStateMap = BTreeMap<InstanceId, SegmentState>;

/// Segment name -> replica states. Ordered so every traversal is deterministic.
pub type SegmentAssignment = BTreeMap<String, InstanceStateMap>;

/// Lifecycle state of a single segment replica:
///
/// ```text
/// absent → OFFLINE → ONLINE | CONSUMING → absent
///            ^plan     ^external load     ^plan
/// ERROR → absent
/// ```
///
/// New replicas always enter as `Offline`. `Error` is reported externally and
/// counts as missing capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentState {
    /// Active ingestion target. Only the most recent segment of a partition.
    Consuming,
    Online,
    /// Assigned but not serving yet.
    Offline,
    Error,
}

impl SegmentState {
    pub fn is_serving(self) -> bool {
        matches!(self, SegmentState::Online | SegmentState::Consuming)
    }
}

/// The serving state every replica of a segment should converge to.
pub fn target_state(states: &InstanceStateMap) -> SegmentState {
    if is_consuming(states) {
        SegmentState::Consuming
    } else {
        SegmentState::Online
    }
}

pub fn is_consuming(states: &InstanceStateMap) -> bool {
    states.values().any(|s| *s == SegmentState::Consuming)
}

/// Number of replicas currently able to serve queries.
pub fn serving_count(states: &InstanceStateMap) -> usize {
    states.values().filter(|s| s.is_serving()).count()
}
