use serde::{Deserialize, Serialize};

use crate::error::{AssignmentError, Result};
use crate::strategy;

/// Per-table assignment settings, bound once when the engine is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub table_name: String,
    /// Required number of serving replicas per segment.
    pub replication: usize,
    /// Registry name of the placement strategy, e.g. `"balanced"`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Replicas that must stay serving while a rebalance moves a segment.
    /// Negative values mean "replication minus n".
    #[serde(default = "default_min_available_replicas")]
    pub min_available_replicas: i32,
    /// Upper bound on operations touching one instance within a single wave.
    #[serde(default)]
    pub max_moves_per_instance: Option<usize>,
    /// Largest segment-count spread tolerated between instances of one pool
    /// before existing replicas are moved to restore balance.
    #[serde(default = "default_fairness_tolerance")]
    pub fairness_tolerance: usize,
    /// Topology snapshots older than this version are rejected as stale.
    #[serde(default)]
    pub min_topology_version: u64,
}

fn default_strategy() -> String {
    strategy::BALANCED.to_string()
}

fn default_min_available_replicas() -> i32 {
    1
}

fn default_fairness_tolerance() -> usize {
    1
}

impl TableConfig {
    pub fn new(table_name: impl Into<String>, replication: usize) -> Self {
        Self {
            table_name: table_name.into(),
            replication,
            strategy: default_strategy(),
            min_available_replicas: default_min_available_replicas(),
            max_moves_per_instance: None,
            fairness_tolerance: default_fairness_tolerance(),
            min_topology_version: 0,
        }
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = strategy.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(AssignmentError::InvalidConfig(
                "table_name must not be empty".to_string(),
            ));
        }
        if self.replication == 0 {
            return Err(AssignmentError::InvalidConfig(
                "replication must be at least 1".to_string(),
            ));
        }
        if self.fairness_tolerance == 0 {
            return Err(AssignmentError::InvalidConfig(
                "fairness_tolerance must be at least 1".to_string(),
            ));
        }
        if self.max_moves_per_instance == Some(0) {
            return Err(AssignmentError::InvalidConfig(
                "max_moves_per_instance must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// `min_available_replicas` resolved against the replication factor.
    ///
    /// Positive values are capped at the replication factor, negative values
    /// count down from it and bottom out at zero.
    pub fn resolved_min_available_replicas(&self) -> usize {
        let replication = i64::try_from(self.replication).unwrap_or(i64::MAX);
        let requested = i64::from(self.min_available_replicas);
        let resolved = if requested >= 0 {
            requested.min(replication)
        } else {
            (replication + requested).max(0)
        };
        usize::try_from(resolved).unwrap_or(0)
    }
}

/// Knobs for a single rebalance run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOptions {
    /// Compute and report the plan without writing it.
    #[serde(default)]
    pub dry_run: bool,
    /// Skip availability sequencing: every addition then every removal in one wave.
    #[serde(default)]
    pub downtime: bool,
    /// Ignore current placements and lay the table out from scratch.
    #[serde(default)]
    pub bootstrap: bool,
    /// When false, segments with a CONSUMING replica are left untouched.
    #[serde(default = "default_include_consuming")]
    pub include_consuming: bool,
}

fn default_include_consuming() -> bool {
    true
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            downtime: false,
            bootstrap: false,
            include_consuming: default_include_consuming(),
        }
    }
}
