use serde::{Deserialize, Serialize};

use segment_assignment::SegmentAssignment;

/// Persisted assignment of one table: a single JSON document per table, so
/// one conditional write covers every segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub table: String,
    /// Version of the topology the last writer planned against. Writers
    /// holding an older topology must re-read before writing.
    pub topology_version: u64,
    #[serde(default)]
    pub segments: SegmentAssignment,
    pub updated_at: i64,
}

impl AssignmentRecord {
    pub fn empty(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            topology_version: 0,
            segments: SegmentAssignment::new(),
            updated_at: 0,
        }
    }
}
