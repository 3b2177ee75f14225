use crate::error::{AssignmentError, Result};

const LLC_SEPARATOR: &str = "__";

/// Partition used for segments whose name carries no partition id.
pub const DEFAULT_PARTITION: u32 = 0;

/// Parsed view of a segment name.
///
/// Low-level-consumer segments are named
/// `{table}__{partition}__{sequence}__{creation_time}`; the partition and
/// sequence number come straight out of the name. Anything else is treated as
/// an uploaded segment of the default partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName<'a> {
    name: &'a str,
    partition: u32,
    sequence: Option<u32>,
}

impl<'a> SegmentName<'a> {
    pub fn parse(name: &'a str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(AssignmentError::InvalidSegmentName(name.to_string()));
        }

        let parts: Vec<&str> = name.split(LLC_SEPARATOR).collect();
        if parts.len() != 4 {
            return Ok(Self {
                name,
                partition: DEFAULT_PARTITION,
                sequence: None,
            });
        }

        let partition = parts[1]
            .parse()
            .map_err(|_| AssignmentError::InvalidSegmentName(name.to_string()))?;
        let sequence = parts[2]
            .parse()
            .map_err(|_| AssignmentError::InvalidSegmentName(name.to_string()))?;

        Ok(Self {
            name,
            partition,
            sequence: Some(sequence),
        })
    }

    pub fn as_str(&self) -> &'a str {
        self.name
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Creation order within the partition, for consuming-segment names.
    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    pub fn is_llc(&self) -> bool {
        self.sequence.is_some()
    }
}
