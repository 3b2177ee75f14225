use thiserror::Error;

/// Errors produced by the assignment engine.
///
/// Every variant is a synchronous return value. None of them is retried
/// inside the engine: the caller re-reads fresh snapshots and calls again.
/// `Clone` so a rebalance can attach the same error to every affected segment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("insufficient capacity for segment '{segment}': {required} instances required, {available} eligible")]
    InsufficientCapacity {
        segment: String,
        required: usize,
        available: usize,
    },

    #[error("no eligible partition group for segment '{segment}' (partition {partition})")]
    NoEligiblePartitionGroup { segment: String, partition: u32 },

    #[error("topology version {version} is older than the minimum usable version {min_version}")]
    StaleTopology { version: u64, min_version: u64 },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid table config: {0}")]
    InvalidConfig(String),

    #[error("invalid segment name '{0}'")]
    InvalidSegmentName(String),
}

impl AssignmentError {
    /// Attach the segment name to a capacity error raised by a segment-agnostic
    /// helper such as the selector.
    pub fn for_segment(self, segment: &str) -> Self {
        match self {
            AssignmentError::InsufficientCapacity {
                required,
                available,
                ..
            } => AssignmentError::InsufficientCapacity {
                segment: segment.to_string(),
                required,
                available,
            },
            AssignmentError::NoEligiblePartitionGroup { partition, .. } => {
                AssignmentError::NoEligiblePartitionGroup {
                    segment: segment.to_string(),
                    partition,
                }
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssignmentError>;
