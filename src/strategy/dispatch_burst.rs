use crate::clock::ms_to_nanos;
use crate::config::ConfigError;
use crate::record::{CallerSite, SubOperationRecord};
use crate::strategy::{
    check_min_size, check_window, invalid, ordered_by_step, position_of, ClusterId,
    ClusteringStrategy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration for dispatch fan-out burst clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchBurstConfig {
    /// File (path suffix) of the dispatch call-site
    pub dispatch_file: String,

    /// Line of the dispatch call-site (any line when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_line: Option<u32>,

    /// Longest call that still counts as part of a burst
    pub max_duration_ms: f64,

    pub min_burst_size: usize,

    /// Time gap bridged between burst calls separated by other calls;
    /// when unset, burst calls must be step-adjacent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_gap_ms: Option<f64>,
}

impl Default for DispatchBurstConfig {
    fn default() -> Self {
        Self {
            dispatch_file: "dispatcher.rs".to_string(),
            dispatch_line: None,
            max_duration_ms: 50.0,
            min_burst_size: 3,
            max_gap_ms: None,
        }
    }
}

/// Groups the short leaf calls fanned out by one dispatch call-site
///
/// A call is a burst candidate when it came from the configured call-site, has
/// no nested calls of its own, and finished within `max_duration_ms`.
#[derive(Debug, Clone)]
pub struct DispatchBurstStrategy {
    dispatch_file: String,
    dispatch_line: Option<u32>,
    max_duration_nanos: u64,
    min_burst_size: usize,
    max_gap_nanos: Option<u64>,
}

impl DispatchBurstStrategy {
    pub const NAME: &'static str = "dispatch_burst";

    pub fn new(config: DispatchBurstConfig) -> Result<Self, ConfigError> {
        if config.dispatch_file.trim().is_empty() {
            return Err(invalid(Self::NAME, "dispatch_file", "must not be empty"));
        }
        check_window(Self::NAME, "max_duration_ms", config.max_duration_ms)?;
        check_min_size(Self::NAME, "min_burst_size", config.min_burst_size)?;
        if let Some(gap) = config.max_gap_ms {
            check_window(Self::NAME, "max_gap_ms", gap)?;
        }

        Ok(Self {
            dispatch_file: config.dispatch_file.replace('\\', "/"),
            dispatch_line: config.dispatch_line,
            max_duration_nanos: ms_to_nanos(config.max_duration_ms),
            min_burst_size: config.min_burst_size,
            max_gap_nanos: config.max_gap_ms.map(ms_to_nanos),
        })
    }

    fn is_dispatch_site(&self, caller: &CallerSite) -> bool {
        let file = caller.file.replace('\\', "/");
        let file_matches = file == self.dispatch_file
            || file.ends_with(&format!("/{}", self.dispatch_file.trim_start_matches('/')));
        file_matches && self.dispatch_line.map_or(true, |line| line == caller.line)
    }

    fn is_candidate(&self, record: &SubOperationRecord, parents: &HashSet<u32>) -> bool {
        record
            .caller
            .as_ref()
            .is_some_and(|caller| self.is_dispatch_site(caller))
            && !parents.contains(&record.step)
            && record.end_nanos.is_some()
            && record.duration_nanos() <= self.max_duration_nanos
    }

    /// Whether two burst candidates (in step order) belong to one run
    fn joins(
        &self,
        earlier: &SubOperationRecord,
        later: &SubOperationRecord,
        adjacent: bool,
    ) -> bool {
        if adjacent {
            return true;
        }
        match self.max_gap_nanos {
            Some(max_gap) => {
                let earlier_end = earlier.end_nanos.unwrap_or(earlier.start_nanos);
                later.start_nanos.saturating_sub(earlier_end) <= max_gap
            }
            None => false,
        }
    }
}

impl ClusteringStrategy for DispatchBurstStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        let parents: HashSet<u32> = siblings.iter().filter_map(|s| s.parent_step).collect();
        if !self.is_candidate(candidate, &parents) {
            return None;
        }

        let ordered = ordered_by_step(siblings);
        let index = position_of(&ordered, candidate.step)?;
        let burst: Vec<usize> = (0..ordered.len())
            .filter(|&i| self.is_candidate(ordered[i], &parents))
            .collect();
        let at = burst.iter().position(|&i| i == index)?;

        let mut first = at;
        while first > 0 {
            let (prev, cur) = (burst[first - 1], burst[first]);
            if !self.joins(ordered[prev], ordered[cur], cur == prev + 1) {
                break;
            }
            first -= 1;
        }

        let mut last = at;
        while last + 1 < burst.len() {
            let (cur, next) = (burst[last], burst[last + 1]);
            if !self.joins(ordered[cur], ordered[next], next == cur + 1) {
                break;
            }
            last += 1;
        }

        if last - first + 1 < self.min_burst_size {
            return None;
        }

        Some(format!("burst:{}", ordered[burst[first]].step))
    }
}
