use crate::clock::ms_to_nanos;
use crate::config::ConfigError;
use crate::record::SubOperationRecord;
use crate::strategy::{check_min_size, check_window, ClusterId, ClusteringStrategy};
use serde::{Deserialize, Serialize};

/// Configuration for start-time window clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeWindowConfig {
    /// Maximum start-time gap between neighbors in one cluster
    pub window_ms: f64,

    pub min_cluster_size: usize,
}

impl Default for TimeWindowConfig {
    fn default() -> Self {
        Self {
            window_ms: 50.0,
            min_cluster_size: 2,
        }
    }
}

/// Groups sub-operations whose start times chain together within a window
///
/// Neighbors are added one at a time, each compared with the nearest element
/// already in the range, so 0ms/20ms/45ms chain under a 50ms window even though
/// the outer two are 45ms apart.
#[derive(Debug, Clone)]
pub struct TimeWindowStrategy {
    window_nanos: u64,
    min_cluster_size: usize,
}

impl TimeWindowStrategy {
    pub const NAME: &'static str = "time_window";

    pub fn new(config: TimeWindowConfig) -> Result<Self, ConfigError> {
        check_window(Self::NAME, "window_ms", config.window_ms)?;
        check_min_size(Self::NAME, "min_cluster_size", config.min_cluster_size)?;
        Ok(Self {
            window_nanos: ms_to_nanos(config.window_ms),
            min_cluster_size: config.min_cluster_size,
        })
    }
}

impl ClusteringStrategy for TimeWindowStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        let mut by_start: Vec<&SubOperationRecord> = siblings.iter().collect();
        by_start.sort_by_key(|s| (s.start_nanos, s.step));

        let index = by_start.iter().position(|s| s.step == candidate.step)?;

        let mut lo = index;
        while lo > 0
            && by_start[lo].start_nanos - by_start[lo - 1].start_nanos <= self.window_nanos
        {
            lo -= 1;
        }

        let mut hi = index;
        while hi + 1 < by_start.len()
            && by_start[hi + 1].start_nanos - by_start[hi].start_nanos <= self.window_nanos
        {
            hi += 1;
        }

        let size = hi - lo + 1;
        if size < 2 || size < self.min_cluster_size {
            return None;
        }

        Some(format!("range:{}-{}", lo, hi))
    }
}
