use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AssignmentError, Result};
use crate::types::InstanceId;

/// Descriptive tags attached to an instance by the topology resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTags {
    #[serde(default)]
    pub tenant: Option<String>,
    /// Rack, zone or any other failure domain.
    #[serde(default)]
    pub fault_domain: Option<String>,
    #[serde(default = "default_capacity_weight")]
    pub capacity_weight: u32,
}

fn default_capacity_weight() -> u32 {
    1
}

impl Default for InstanceTags {
    fn default() -> Self {
        Self {
            tenant: None,
            fault_domain: None,
            capacity_weight: default_capacity_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    #[serde(default)]
    pub tags: InstanceTags,
}

/// One fault-isolation domain of a partition group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroup {
    pub id: u32,
    pub instances: Vec<InstanceId>,
}

/// Instances eligible to host replicas of one table partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionGroup {
    pub partition: u32,
    pub replica_groups: Vec<ReplicaGroup>,
}

impl PartitionGroup {
    /// A partition group with a single flat pool, as used by balanced tables.
    pub fn flat(partition: u32, instances: &[&str]) -> Self {
        Self {
            partition,
            replica_groups: vec![ReplicaGroup {
                id: 0,
                instances: instances.iter().map(|i| i.to_string()).collect(),
            }],
        }
    }

    pub fn with_replica_groups(partition: u32, groups: &[&[&str]]) -> Self {
        Self {
            partition,
            replica_groups: groups
                .iter()
                .zip(0u32..)
                .map(|(instances, id)| ReplicaGroup {
                    id,
                    instances: instances.iter().map(|i| i.to_string()).collect(),
                })
                .collect(),
        }
    }

    /// Every instance of every replica group, in group order, each once.
    pub fn pool(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.replica_groups
            .iter()
            .flat_map(|g| g.instances.iter())
            .map(String::as_str)
            .filter(|i| seen.insert(*i))
            .collect()
    }
}

/// Versioned snapshot of the instances eligible to serve one table.
///
/// Produced by an external resolver and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub table: String,
    pub version: u64,
    /// Optional registry of instance metadata. When present, every group
    /// member must be registered here.
    #[serde(default)]
    pub instances: BTreeMap<InstanceId, Instance>,
    pub partition_groups: Vec<PartitionGroup>,
}

impl Topology {
    pub fn new(table: impl Into<String>, version: u64) -> Self {
        Self {
            table: table.into(),
            version,
            instances: BTreeMap::new(),
            partition_groups: Vec::new(),
        }
    }

    pub fn with_partition_group(mut self, group: PartitionGroup) -> Self {
        self.partition_groups.push(group);
        self
    }

    pub fn partition_group(&self, partition: u32) -> Option<&PartitionGroup> {
        self.partition_groups
            .iter()
            .find(|g| g.partition == partition)
    }

    pub fn validate(&self) -> Result<()> {
        let mut partitions = HashSet::new();
        for group in &self.partition_groups {
            if !partitions.insert(group.partition) {
                return Err(AssignmentError::InvalidTopology(format!(
                    "partition {} is declared more than once",
                    group.partition
                )));
            }

            let mut members: HashSet<&str> = HashSet::new();
            for replica_group in &group.replica_groups {
                for instance in &replica_group.instances {
                    if !members.insert(instance.as_str()) {
                        return Err(AssignmentError::InvalidTopology(format!(
                            "instance {instance} appears more than once in partition {}",
                            group.partition
                        )));
                    }
                    if !self.instances.is_empty() && !self.instances.contains_key(instance) {
                        return Err(AssignmentError::InvalidTopology(format!(
                            "instance {instance} in partition {} is not registered",
                            group.partition
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
