//! Segment placement and rebalancing for partitioned, replicated tables.
//!
//! Everything in this crate is a pure, synchronous function of explicit
//! snapshots: a table's current segment assignment and the topology of
//! eligible instances. Persisting results is the caller's job.

pub mod config;
pub mod engine;
pub mod error;
pub mod plan;
pub mod rebalance;
pub mod segment_name;
pub mod selector;
pub mod strategy;
pub mod topology;
pub mod types;

mod balance;

pub use config::{RebalanceOptions, TableConfig};
pub use engine::SegmentAssignmentEngine;
pub use error::{AssignmentError, Result};
pub use plan::{TransitionOp, TransitionPlan};
pub use rebalance::{RebalanceResult, UnsatisfiedSegment};
pub use topology::{PartitionGroup, ReplicaGroup, Topology};
pub use types::{InstanceId, InstanceStateMap, SegmentAssignment, SegmentState};
