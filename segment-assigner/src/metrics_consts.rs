/// New segments written to the assignment record.
pub const SEGMENTS_ASSIGNED_COUNTER: &str = "segment_assigner_segments_assigned_total";

/// Conditional writes rejected because the record changed underneath us.
pub const WRITE_CONFLICTS_COUNTER: &str = "segment_assigner_write_conflicts_total";

/// Reads that saw a topology older than the one the record was planned with.
pub const STALE_TOPOLOGY_COUNTER: &str = "segment_assigner_stale_topology_total";

pub const WAVES_APPLIED_COUNTER: &str = "segment_assigner_waves_applied_total";

pub const OPERATIONS_APPLIED_COUNTER: &str = "segment_assigner_operations_applied_total";

/// Operations left in the plan after the last applied wave.
pub const PENDING_OPERATIONS_GAUGE: &str = "segment_assigner_pending_operations";

pub const UNSATISFIED_SEGMENTS_GAUGE: &str = "segment_assigner_unsatisfied_segments";

pub const REBALANCE_COMPUTE_DURATION_HISTOGRAM: &str = "segment_assigner_rebalance_compute_seconds";
