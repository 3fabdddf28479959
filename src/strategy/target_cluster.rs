use crate::config::ConfigError;
use crate::record::SubOperationRecord;
use crate::strategy::{check_min_size, ordered_by_step, position_of, ClusterId, ClusteringStrategy};
use serde::{Deserialize, Serialize};

/// Configuration for same-target run clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetClusterConfig {
    /// Consecutive foreign-target calls tolerated inside a run
    pub max_gap: usize,

    /// Disable gap tolerance entirely
    pub strict: bool,

    pub min_cluster_size: usize,

    /// Only these targets may cluster (empty = any target)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl Default for TargetClusterConfig {
    fn default() -> Self {
        Self {
            max_gap: 1,
            strict: false,
            min_cluster_size: 2,
            targets: Vec::new(),
        }
    }
}

/// Groups step-ordered runs of calls addressed to the same component
///
/// A run survives up to `max_gap` consecutive calls to other targets; the
/// resolved range runs from the first to the last same-target member.
#[derive(Debug, Clone)]
pub struct TargetClusterStrategy {
    max_gap: usize,
    min_cluster_size: usize,
    targets: Vec<String>,
}

impl TargetClusterStrategy {
    pub const NAME: &'static str = "target_cluster";

    pub fn new(config: TargetClusterConfig) -> Result<Self, ConfigError> {
        check_min_size(Self::NAME, "min_cluster_size", config.min_cluster_size)?;
        Ok(Self {
            max_gap: if config.strict { 0 } else { config.max_gap },
            min_cluster_size: config.min_cluster_size,
            targets: config.targets,
        })
    }

    fn eligible(&self, target: &str) -> bool {
        !target.is_empty() && (self.targets.is_empty() || self.targets.iter().any(|t| t == target))
    }

    /// Furthest same-target index reachable walking in one direction
    fn extend<I>(
        &self,
        indices: I,
        ordered: &[&SubOperationRecord],
        target: &str,
        start: usize,
    ) -> usize
    where
        I: Iterator<Item = usize>,
    {
        let mut reached = start;
        let mut gap = 0;
        for i in indices {
            if ordered[i].target == target {
                reached = i;
                gap = 0;
            } else {
                gap += 1;
                if gap > self.max_gap {
                    break;
                }
            }
        }
        reached
    }
}

impl ClusteringStrategy for TargetClusterStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        if !self.eligible(&candidate.target) {
            return None;
        }

        let ordered = ordered_by_step(siblings);
        let index = position_of(&ordered, candidate.step)?;
        let target = candidate.target.as_str();

        let lo = self.extend((0..index).rev(), &ordered, target, index);
        let hi = self.extend(index + 1..ordered.len(), &ordered, target, index);

        let members = ordered[lo..=hi].iter().filter(|s| s.target == target).count();
        if members < self.min_cluster_size {
            return None;
        }

        Some(format!(
            "{}:{}-{}",
            target, ordered[lo].step, ordered[hi].step
        ))
    }
}
